//! Single-row table tracking the dataset-wide last-update timestamp
//! (`db->setLastUpdate()` in the original metadata manager); every `meta`
//! write bumps it (§4.2).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "database_meta")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub last_update: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
