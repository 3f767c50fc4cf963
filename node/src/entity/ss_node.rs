use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ss_node")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub traffic_rate: f64,
    pub node_bandwidth: i64,
    pub node_bandwidth_limit: i64,
    pub node_heartbeat: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
