pub mod metadata;
pub mod sp_record;
