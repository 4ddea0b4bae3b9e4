//! SeaORM entity definitions for the three tables named in §3.4/§6.1:
//! `entries`, `entries_meta`, `passwords`, plus a small `database_meta`
//! singleton row tracking the dataset-wide last-update timestamp that
//! `MetaManager` writes bump (§4.2).

pub mod database_meta;
pub mod entry;
pub mod meta_item;
pub mod password;
