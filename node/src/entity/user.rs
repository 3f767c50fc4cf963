use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Cumulative upload in bytes
    pub u: i64,
    /// Cumulative download in bytes
    pub d: i64,
    /// Last time traffic was reported for this user
    pub t: i64,
    pub port: i32,
    pub method: String,
    pub passwd: String,
    pub enable: i32,
    pub transfer_enable: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
