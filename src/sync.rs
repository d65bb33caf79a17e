use std::collections::HashSet;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::record::{cert_file, pub_file, BuiltRecord};
use crate::store::ArtifactStore;

pub const METADATA_SUFFIX: &str = "-metadata.json";

/// Lowercase hex SHA-256 of the serialized record.
pub fn fingerprint(json: &str) -> String {
    hex::encode(Sha256::digest(json.as_bytes()))
}

pub fn artifact_name(name: &str, fingerprint: &str) -> String {
    format!("{}-{}{}", name, fingerprint, METADATA_SUFFIX)
}

/// Split `<name>-<fingerprint>-metadata.json` into its SP name and fingerprint.
pub fn parse_artifact_name(file: &str) -> Option<(&str, &str)> {
    let stem = file.strip_suffix(METADATA_SUFFIX)?;
    let (name, fingerprint) = stem.rsplit_once('-')?;
    if name.is_empty() || fingerprint.is_empty() {
        return None;
    }
    Some((name, fingerprint))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created { fingerprint: String },
    Updated { previous: String, fingerprint: String },
    Unchanged { fingerprint: String },
    /// Fingerprint matched but a trust-material file had to be rewritten
    Repaired { fingerprint: String },
}

impl SyncOutcome {
    pub fn fingerprint(&self) -> &str {
        match self {
            SyncOutcome::Created { fingerprint }
            | SyncOutcome::Updated { fingerprint, .. }
            | SyncOutcome::Unchanged { fingerprint }
            | SyncOutcome::Repaired { fingerprint } => fingerprint,
        }
    }
}

/// Converge the artifact triple of one SP to `built`.
///
/// An unchanged fingerprint performs no write at all. A changed one rewrites the
/// old descriptor in place and renames it to the new fingerprinted name before
/// the certificate and public key are regenerated.
pub fn sync_record(
    store: &mut dyn ArtifactStore,
    name: &str,
    built: &BuiltRecord,
    cert_file_name: &str,
) -> Result<SyncOutcome> {
    let json = built.record.to_json()?;
    let fingerprint = fingerprint(&json);
    let target = artifact_name(name, &fingerprint);

    let existing: Vec<String> = store
        .list()?
        .into_iter()
        .filter(|f| parse_artifact_name(f).is_some_and(|(owner, _)| owner == name))
        .collect();

    let Some(first) = existing.first() else {
        store.write(&target, &json)?;
        write_trust_material(store, name, built, cert_file_name)?;
        tracing::info!(sp = name, file = %target, "created");
        return Ok(SyncOutcome::Created { fingerprint });
    };

    let current = if existing.contains(&target) { target.clone() } else { first.clone() };
    for extra in existing.iter().filter(|f| **f != current) {
        match store.remove(extra) {
            Ok(()) => tracing::info!(sp = name, file = %extra, "removed duplicate descriptor"),
            Err(e) => tracing::warn!(sp = name, error = %format!("{:#}", e), "could not remove duplicate descriptor"),
        }
    }

    if current == target {
        // Trust file contents are not part of the fingerprint
        let mut repaired = false;
        for (file, contents) in [
            (cert_file(name, cert_file_name), &built.certificate_pem),
            (pub_file(name, cert_file_name), &built.public_key_pem),
        ] {
            if store.read(&file).ok().as_ref() != Some(contents) {
                store.write(&file, contents)?;
                tracing::info!(sp = name, file = %file, "rewrote stale or missing trust material");
                repaired = true;
            }
        }
        if repaired {
            return Ok(SyncOutcome::Repaired { fingerprint });
        }
        tracing::debug!(sp = name, "unchanged");
        return Ok(SyncOutcome::Unchanged { fingerprint });
    }

    let previous = parse_artifact_name(&current)
        .map(|(_, fp)| fp.to_string())
        .unwrap_or_default();

    store.write(&current, &json)?;
    store.rename(&current, &target)?;
    write_trust_material(store, name, built, cert_file_name)?;
    tracing::info!(sp = name, from = %current, to = %target, "updated");

    Ok(SyncOutcome::Updated {
        previous,
        fingerprint,
    })
}

fn write_trust_material(
    store: &mut dyn ArtifactStore,
    name: &str,
    built: &BuiltRecord,
    cert_file_name: &str,
) -> Result<()> {
    store.write(&cert_file(name, cert_file_name), &built.certificate_pem)?;
    store.write(&pub_file(name, cert_file_name), &built.public_key_pem)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedArtifact {
    pub name: String,
    pub files: Vec<String>,
}

/// Delete every artifact triple whose SP is not in `enrolled`.
///
/// Best-effort: failures are logged and do not stop the pass.
pub fn prune(store: &mut dyn ArtifactStore, enrolled: &[String], cert_file_name: &str) -> Vec<PrunedArtifact> {
    let files = match store.list() {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "could not list artifacts for pruning");
            return Vec::new();
        }
    };

    let enrolled: HashSet<&str> = enrolled.iter().map(String::as_str).collect();
    let mut pruned = Vec::new();

    for file in &files {
        let Some((owner, _)) = parse_artifact_name(file) else {
            continue;
        };
        if enrolled.contains(owner) {
            continue;
        }

        let (cert, public_key) = trust_files_of(store, file, owner, cert_file_name);
        let mut removed = Vec::new();
        for target in [file.clone(), cert, public_key] {
            if !store.exists(&target) {
                tracing::warn!(sp = owner, file = %target, "artifact already gone");
                continue;
            }
            match store.remove(&target) {
                Ok(()) => {
                    tracing::info!(sp = owner, file = %target, "deleted");
                    removed.push(target);
                }
                Err(e) => tracing::warn!(sp = owner, error = %format!("{:#}", e), "could not delete"),
            }
        }

        pruned.push(PrunedArtifact {
            name: owner.to_string(),
            files: removed,
        });
    }

    pruned
}

/// Certificate and key file names recorded in a descriptor, falling back to
/// the names derived from the SP name.
fn trust_files_of(store: &dyn ArtifactStore, file: &str, owner: &str, cert_file_name: &str) -> (String, String) {
    let recorded = store
        .read(file)
        .ok()
        .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok());

    // Never follow a recorded name into another SP's files
    let owned_prefix = format!("{}-", owner);
    let pick = |key: &str, fallback: String| {
        recorded
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .filter(|f| is_plain_file_name(f) && f.starts_with(&owned_prefix))
            .map(String::from)
            .unwrap_or(fallback)
    };

    (
        pick("cert", cert_file(owner, cert_file_name)),
        pick("pub", pub_file(owner, cert_file_name)),
    )
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sp_record::{OidcClient, SamlEcp, SpRecord};
    use crate::store::memory::MemoryStore;

    const CFN: &str = "sp-signing";

    fn built(name: &str, acs: &str) -> BuiltRecord {
        BuiltRecord {
            record: SpRecord {
                appl: name.to_string(),
                issuer: format!("https://{}.example.org", name),
                url: "https://example.org/about".to_string(),
                logo: "data:image/png;base64,AAAA".to_string(),
                protection_requirements: "normal".to_string(),
                users: vec![],
                saml_ecp: SamlEcp::default(),
                groups: vec![],
                preferred_authn_context: String::new(),
                preferred_nameid_format: String::new(),
                single_logout_service: String::new(),
                logout_response_url: String::new(),
                assertion_consumer_service: acs.to_string(),
                add_attribute_value_definition: true,
                send_error_response: true,
                visible: true,
                secure: false,
                cert: cert_file(name, CFN),
                public_key: pub_file(name, CFN),
                oidc_client: OidcClient::default(),
                req_attr: vec![],
                contacts: vec![],
            },
            certificate_pem: format!("cert of {}", name),
            public_key_pem: format!("key of {}", name),
        }
    }

    fn json_name(name: &str, built: &BuiltRecord) -> String {
        artifact_name(name, &fingerprint(&built.record.to_json().unwrap()))
    }

    #[test]
    fn parses_artifact_names() {
        assert_eq!(parse_artifact_name("Svc-abc-metadata.json"), Some(("Svc", "abc")));
        assert_eq!(parse_artifact_name("My-Svc-abc-metadata.json"), Some(("My-Svc", "abc")));
        assert_eq!(parse_artifact_name("Svc-sp-signing.crt"), None);
        assert_eq!(parse_artifact_name("-abc-metadata.json"), None);
        assert_eq!(parse_artifact_name("notes.json"), None);
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn creates_triple() {
        let mut store = MemoryStore::default();
        let b = built("ServiceOne", "https://a");
        let outcome = sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();

        assert!(matches!(outcome, SyncOutcome::Created { .. }));
        let expected = json_name("ServiceOne", &b);
        assert_eq!(
            store.list().unwrap(),
            vec![
                expected.clone(),
                "ServiceOne-sp-signing.crt".to_string(),
                "ServiceOne-sp-signing.pub".to_string(),
            ]
        );
        assert_eq!(store.files[&expected], b.record.to_json().unwrap());
        assert_eq!(store.files["ServiceOne-sp-signing.crt"], "cert of ServiceOne");
    }

    #[test]
    fn unchanged_record_does_not_write() {
        let mut store = MemoryStore::default();
        let b = built("ServiceOne", "https://a");
        sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();
        let before = store.mutations;

        let outcome = sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();
        assert!(matches!(outcome, SyncOutcome::Unchanged { .. }));
        assert_eq!(store.mutations, before);
    }

    #[test]
    fn changed_record_is_written_then_renamed() {
        let mut store = MemoryStore::default();
        let old = built("ServiceOne", "https://a");
        sync_record(&mut store, "ServiceOne", &old, CFN).unwrap();
        let old_name = json_name("ServiceOne", &old);

        let new = built("ServiceOne", "https://b");
        store.ops.clear();
        let outcome = sync_record(&mut store, "ServiceOne", &new, CFN).unwrap();
        let new_name = json_name("ServiceOne", &new);

        assert_eq!(
            store.ops,
            vec![
                format!("write {}", old_name),
                format!("rename {} {}", old_name, new_name),
                "write ServiceOne-sp-signing.crt".to_string(),
                "write ServiceOne-sp-signing.pub".to_string(),
            ]
        );

        match outcome {
            SyncOutcome::Updated { previous, fingerprint } => {
                assert!(old_name.contains(&previous));
                assert!(new_name.contains(&fingerprint));
            }
            other => panic!("expected update, got {:?}", other),
        }
        assert!(!store.exists(&old_name));
        assert_eq!(store.files[&new_name], new.record.to_json().unwrap());
        assert_eq!(store.files.len(), 3);
    }

    #[test]
    fn missing_certificate_is_restored() {
        let mut store = MemoryStore::default();
        let b = built("ServiceOne", "https://a");
        sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();
        store.files.remove("ServiceOne-sp-signing.crt");

        let outcome = sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();
        assert!(matches!(outcome, SyncOutcome::Repaired { .. }));
        assert_eq!(store.files["ServiceOne-sp-signing.crt"], "cert of ServiceOne");
    }

    #[test]
    fn rolled_over_certificate_reaches_disk() {
        let mut store = MemoryStore::default();
        let mut b = built("ServiceOne", "https://a");
        sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();

        // Same record, new key material
        b.certificate_pem = "new cert of ServiceOne".to_string();
        store.ops.clear();
        let outcome = sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();

        assert!(matches!(outcome, SyncOutcome::Repaired { .. }));
        assert_eq!(store.files["ServiceOne-sp-signing.crt"], "new cert of ServiceOne");
        assert_eq!(store.ops, vec!["write ServiceOne-sp-signing.crt".to_string()]);

        store.mutations = 0;
        let outcome = sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();
        assert!(matches!(outcome, SyncOutcome::Unchanged { .. }));
        assert_eq!(store.mutations, 0);
    }

    #[test]
    fn stale_certificate_after_interrupted_update_is_rewritten() {
        let mut store = MemoryStore::default();
        let old = built("ServiceOne", "https://a");
        sync_record(&mut store, "ServiceOne", &old, CFN).unwrap();

        // Descriptor already renamed, trust files still from the old run
        let mut new = built("ServiceOne", "https://b");
        new.certificate_pem = "new cert".to_string();
        new.public_key_pem = "new key".to_string();
        let json = new.record.to_json().unwrap();
        store.files.remove(&json_name("ServiceOne", &old));
        store.files.insert(json_name("ServiceOne", &new), json);

        let outcome = sync_record(&mut store, "ServiceOne", &new, CFN).unwrap();
        assert!(matches!(outcome, SyncOutcome::Repaired { .. }));
        assert_eq!(store.files["ServiceOne-sp-signing.crt"], "new cert");
        assert_eq!(store.files["ServiceOne-sp-signing.pub"], "new key");
    }

    #[test]
    fn duplicate_descriptors_collapse_to_one() {
        let mut store = MemoryStore::default();
        store.write("ServiceOne-aaaa-metadata.json", "{}").unwrap();
        store.write("ServiceOne-bbbb-metadata.json", "{}").unwrap();

        let b = built("ServiceOne", "https://a");
        sync_record(&mut store, "ServiceOne", &b, CFN).unwrap();

        let descriptors: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .filter(|f| f.ends_with(METADATA_SUFFIX))
            .collect();
        assert_eq!(descriptors, vec![json_name("ServiceOne", &b)]);
    }

    #[test]
    fn similar_names_are_not_confused() {
        let mut store = MemoryStore::default();
        let one = built("ServiceOne", "https://a");
        let one_beta = built("ServiceOneBeta", "https://b");
        sync_record(&mut store, "ServiceOneBeta", &one_beta, CFN).unwrap();

        let outcome = sync_record(&mut store, "ServiceOne", &one, CFN).unwrap();
        assert!(matches!(outcome, SyncOutcome::Created { .. }));
        assert!(store.exists(&json_name("ServiceOneBeta", &one_beta)));
        assert_eq!(store.files.len(), 6);
    }

    #[test]
    fn prune_removes_disenrolled_triples_only() {
        let mut store = MemoryStore::default();
        let keep = built("Keep", "https://a");
        let gone = built("Gone", "https://b");
        sync_record(&mut store, "Keep", &keep, CFN).unwrap();
        sync_record(&mut store, "Gone", &gone, CFN).unwrap();
        store.write("notes.json", "{}").unwrap();

        let pruned = prune(&mut store, &["Keep".to_string()], CFN);

        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].name, "Gone");
        assert_eq!(pruned[0].files.len(), 3);
        assert_eq!(
            store.list().unwrap(),
            vec![
                json_name("Keep", &keep),
                "Keep-sp-signing.crt".to_string(),
                "Keep-sp-signing.pub".to_string(),
                "notes.json".to_string(),
            ]
        );
    }

    #[test]
    fn prune_uses_recorded_trust_file_names() {
        let mut store = MemoryStore::default();
        let mut gone = built("Gone", "https://b");
        // Artifacts written under an older certFileName
        gone.record.cert = cert_file("Gone", "old-suffix");
        gone.record.public_key = pub_file("Gone", "old-suffix");
        sync_record(&mut store, "Gone", &gone, "old-suffix").unwrap();

        let pruned = prune(&mut store, &[], "new-suffix");
        assert_eq!(pruned[0].files.len(), 3);
        assert!(store.files.is_empty());
    }

    #[test]
    fn prune_is_best_effort() {
        let mut store = MemoryStore::default();
        let a = built("A", "https://a");
        let b = built("B", "https://b");
        sync_record(&mut store, "A", &a, CFN).unwrap();
        sync_record(&mut store, "B", &b, CFN).unwrap();
        store.undeletable.insert("A-sp-signing.crt".to_string());

        let pruned = prune(&mut store, &[], CFN);
        assert_eq!(pruned.len(), 2);
        assert_eq!(store.list().unwrap(), vec!["A-sp-signing.crt".to_string()]);
    }

    #[test]
    fn prune_never_deletes_another_sps_trust_files() {
        let mut store = MemoryStore::default();
        let keep = built("Keep", "https://a");
        sync_record(&mut store, "Keep", &keep, CFN).unwrap();
        store
            .write(
                "Gone-abcd-metadata.json",
                r#"{"cert":"Keep-sp-signing.crt","pub":"Keep-sp-signing.pub"}"#,
            )
            .unwrap();
        store.write("Gone-sp-signing.crt", "c").unwrap();
        store.write("Gone-sp-signing.pub", "p").unwrap();

        let pruned = prune(&mut store, &["Keep".to_string()], CFN);
        assert_eq!(pruned[0].files.len(), 3);
        assert!(store.exists("Keep-sp-signing.crt"));
        assert!(store.exists("Keep-sp-signing.pub"));
        assert!(!store.exists("Gone-sp-signing.crt"));
    }

    #[test]
    fn prune_ignores_path_like_recorded_names() {
        let mut store = MemoryStore::default();
        store
            .write("Evil-abcd-metadata.json", r#"{"cert":"../../etc/passwd","pub":"Evil-x.pub"}"#)
            .unwrap();
        store.write("Evil-sp-signing.crt", "c").unwrap();
        store.write("Evil-x.pub", "p").unwrap();

        let pruned = prune(&mut store, &[], CFN);
        assert_eq!(pruned[0].files.len(), 3);
        assert!(store.files.is_empty());
    }
}
