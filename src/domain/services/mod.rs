pub mod external_ids;
