//! One reconciliation pass: metadata document in, converged artifact directory out.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::config::EnrolledSp;
use crate::extract;
use crate::fetch::Fetcher;
use crate::model::metadata::{EntityDescriptor, MetadataDocument, SpDescriptor};
use crate::parsers;
use crate::record;
use crate::result::{RunReport, SpResult};
use crate::selector;
use crate::signature::{self, TrustAnchor};
use crate::store::ArtifactStore;
use crate::sync;

pub struct RunOptions<'a> {
    pub sps: &'a [EnrolledSp],
    pub cert_file_name: &'a str,
    pub require_valid_signature: bool,
    pub now: DateTime<Utc>,
}

/// Verify, reconcile every enrolled SP found in `xml`, then prune.
///
/// Only an unparseable document, or a failed signature in strict mode, aborts
/// the pass. Everything else is isolated to the SP it concerns.
pub fn run(
    xml: &str,
    anchor: &TrustAnchor,
    opts: &RunOptions<'_>,
    store: &mut dyn ArtifactStore,
    fetcher: &dyn Fetcher,
) -> Result<RunReport> {
    let doc = parsers::metadata::parse_str(xml).context("Failed to parse metadata")?;

    let signature = signature::check(xml, anchor);
    if opts.require_valid_signature && !signature.is_verified() {
        bail!("Metadata signature did not verify, no artifacts were touched");
    }

    let mut results = reconcile_entities(&doc, opts, store, fetcher);

    let enrolled: Vec<String> = opts.sps.iter().map(|sp| sp.name.clone()).collect();
    for artifact in sync::prune(store, &enrolled, opts.cert_file_name) {
        results.push(SpResult::pruned(&artifact));
    }

    Ok(RunReport { signature, results })
}

/// Process entities in document order; each enrolled SP is handled at most once.
///
/// Only an entity with an SP role claims an enrolled SP. One that matches
/// without the role is passed over so a later SP entity can still be used.
pub fn reconcile_entities(
    doc: &MetadataDocument,
    opts: &RunOptions<'_>,
    store: &mut dyn ArtifactStore,
    fetcher: &dyn Fetcher,
) -> Vec<SpResult> {
    let mut results = Vec::new();
    let mut handled: HashSet<&str> = HashSet::new();
    let mut without_role: HashSet<&str> = HashSet::new();

    for entity in &doc.entities {
        let Some(sp) = match_enrolled(entity, opts.sps) else {
            continue;
        };
        if handled.contains(sp.name.as_str()) {
            tracing::warn!(
                sp = %sp.name,
                entity_id = %entity.entity_id,
                "SP already matched an earlier entity, ignoring this one"
            );
            continue;
        }
        let Some(descriptor) = entity.sp.as_ref() else {
            tracing::warn!(sp = %sp.name, entity_id = %entity.entity_id, "entity has no SPSSODescriptor, passed over");
            without_role.insert(sp.name.as_str());
            continue;
        };
        handled.insert(sp.name.as_str());
        results.push(process(sp, entity, descriptor, opts, store, fetcher));
    }

    for sp in opts.sps.iter().filter(|sp| !handled.contains(sp.name.as_str())) {
        if without_role.contains(sp.name.as_str()) {
            tracing::warn!(sp = %sp.name, "matching entities have no SPSSODescriptor, skipped");
            results.push(SpResult::skipped(sp, vec!["No SPSSODescriptor found".to_string()]));
        } else {
            tracing::warn!(sp = %sp.name, entity_id = %sp.entity_id, "SP not found in metadata");
            results.push(SpResult::not_found(sp));
        }
    }

    results
}

/// First enrolled SP whose entityID is contained in the entity's entityID.
fn match_enrolled<'a>(entity: &EntityDescriptor, sps: &'a [EnrolledSp]) -> Option<&'a EnrolledSp> {
    let mut matches = sps
        .iter()
        .filter(|sp| entity.entity_id.contains(sp.entity_id.as_str()));
    let first = matches.next()?;
    let others: Vec<&str> = matches.map(|sp| sp.name.as_str()).collect();
    if !others.is_empty() {
        tracing::warn!(
            entity_id = %entity.entity_id,
            chosen = %first.name,
            ignored = ?others,
            "entityID matches several enrolled SPs, using the first"
        );
    }
    Some(first)
}

fn process(
    sp: &EnrolledSp,
    entity: &EntityDescriptor,
    descriptor: &SpDescriptor,
    opts: &RunOptions<'_>,
    store: &mut dyn ArtifactStore,
    fetcher: &dyn Fetcher,
) -> SpResult {
    let _span = tracing::info_span!("sp", name = %sp.name).entered();

    let mut reasons = Vec::new();
    let certificate = match selector::select(&descriptor.certificates, opts.now) {
        Ok(cert) => Some(cert),
        Err(e) => {
            tracing::error!(error = %e, "certificate selection failed");
            reasons.push(e.to_string());
            None
        }
    };

    let fields = extract::extract(entity, descriptor, fetcher);

    let built = match record::build(sp, certificate.as_ref(), &fields, opts.cert_file_name) {
        Ok(built) => built,
        Err(missing) => {
            reasons.extend(missing.iter().map(|m| m.to_string()));
            tracing::warn!(reasons = ?reasons, "SP skipped");
            return SpResult::skipped(sp, reasons);
        }
    };

    match sync::sync_record(store, &sp.name, &built, opts.cert_file_name) {
        Ok(outcome) => SpResult::synced(sp, &outcome),
        Err(e) => {
            let reason = format!("{:#}", e);
            tracing::error!(error = %reason, "could not write artifacts");
            SpResult::skipped(sp, vec![reason])
        }
    }
}
