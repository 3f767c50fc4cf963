use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ss_node_info")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub node_id: i32,
    pub uptime: f64,
    /// 1, 5 and 15 minute load averages separated by spaces
    pub load: String,
    pub log_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
