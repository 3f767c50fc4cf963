use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ss_node_online_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub node_id: i32,
    pub online_user: i32,
    pub log_time: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
