pub mod intake;
pub mod upload_record;
pub mod upload_table;
