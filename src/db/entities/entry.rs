//! `entries` table (§3.1, §3.4): the relational half of the Entry model.
//! Geometry columns are WKT text (see `db::mod` doc comment and DESIGN.md);
//! `min_lon`/`min_lat`/`max_lon`/`max_lat` cache `polygon_geom`'s bounding
//! box so spatial queries can prefilter in SQL before doing an exact test in
//! Rust.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub path: String,
    pub hash: String,
    pub entry_type: i32,
    pub properties: String,
    pub mtime: i64,
    pub size: i64,
    pub depth: i32,
    pub point_geom: Option<String>,
    pub polygon_geom: Option<String>,
    pub min_lon: Option<f64>,
    pub min_lat: Option<f64>,
    pub max_lon: Option<f64>,
    pub max_lat: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
