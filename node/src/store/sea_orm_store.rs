use super::NodeStore;
use crate::config::DatabaseConfig;
use crate::entity::{ss_node, ss_node_info, ss_node_online_log, user, user_traffic_log};
use crate::error::{NodeError, Result};
use crate::model::{NodeInfo, NodeQuota, TrafficEntry, UserRecord};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use tracing::{debug, info, instrument};

pub struct SeaOrmStore {
    db: DatabaseConnection,
    node_id: i32,
}

impl SeaOrmStore {
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig, node_id: i32) -> Result<Self> {
        let mut options = ConnectOptions::new(config.url());
        options
            .max_connections(config.max_connections)
            .connect_lazy(true)
            .sqlx_logging(false);
        let db = Database::connect(options).await?;

        info!(
            "Using database {} on {}:{}",
            config.name, config.host, config.port
        );
        Ok(Self::new(db, node_id))
    }

    pub fn new(db: DatabaseConnection, node_id: i32) -> Self {
        Self { db, node_id }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl NodeStore for SeaOrmStore {
    fn node_id(&self) -> i32 {
        self.node_id
    }

    #[instrument(skip(self), fields(node_id = self.node_id))]
    async fn node_quota(&self) -> Result<NodeQuota> {
        let node = ss_node::Entity::find_by_id(self.node_id)
            .one(&self.db)
            .await?
            .ok_or(NodeError::NodeNotFound(self.node_id))?;
        NodeQuota::try_from(node)
    }

    #[instrument(skip(self))]
    async fn enabled_users(&self) -> Result<Vec<UserRecord>> {
        let users = user::Entity::find()
            .filter(user::Column::Enable.eq(1))
            .order_by_asc(user::Column::Id)
            .all(&self.db)
            .await?;
        debug!("Fetched {} enabled users", users.len());

        users.into_iter().map(UserRecord::try_from).collect()
    }

    #[instrument(skip(self), fields(node_id = self.node_id))]
    async fn touch_heartbeat(&self, at: i64) -> Result<()> {
        let result = ss_node::Entity::update_many()
            .col_expr(ss_node::Column::NodeHeartbeat, Expr::value(at))
            .filter(ss_node::Column::Id.eq(self.node_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(NodeError::NodeNotFound(self.node_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(node_id = self.node_id))]
    async fn add_node_bandwidth(&self, bytes: u64) -> Result<()> {
        let bytes = signed(bytes, "node bandwidth increment")?;
        let result = ss_node::Entity::update_many()
            .col_expr(
                ss_node::Column::NodeBandwidth,
                Expr::col(ss_node::Column::NodeBandwidth).add(bytes),
            )
            .filter(ss_node::Column::Id.eq(self.node_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(NodeError::NodeNotFound(self.node_id));
        }
        Ok(())
    }

    #[instrument(skip(self, entry), fields(user_id = entry.user_id))]
    async fn record_user_traffic(&self, entry: &TrafficEntry) -> Result<()> {
        let upload = signed(entry.upload, "rated upload")?;
        let download = signed(entry.download, "rated download")?;
        let traffic = entry
            .traffic()
            .ok_or_else(|| NodeError::DataIntegrity("rated traffic overflows".to_string()))
            .and_then(|traffic| signed(traffic, "rated traffic"))?;

        let txn = self.db.begin().await?;

        let log = user_traffic_log::ActiveModel {
            id: NotSet,
            user_id: Set(entry.user_id),
            u: Set(upload),
            d: Set(download),
            node_id: Set(self.node_id),
            rate: Set(entry.rate),
            traffic: Set(traffic),
            log_time: Set(entry.logged_at),
        };
        user_traffic_log::Entity::insert(log).exec(&txn).await?;

        let result = user::Entity::update_many()
            .col_expr(user::Column::U, Expr::col(user::Column::U).add(upload))
            .col_expr(user::Column::D, Expr::col(user::Column::D).add(download))
            .col_expr(user::Column::T, Expr::value(entry.logged_at))
            .filter(user::Column::Id.eq(entry.user_id))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(NodeError::DataIntegrity(format!(
                "user {} disappeared before its traffic was recorded",
                entry.user_id
            )));
        }

        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, info), fields(node_id = self.node_id))]
    async fn insert_node_info(&self, info: &NodeInfo) -> Result<()> {
        let row = ss_node_info::ActiveModel {
            id: NotSet,
            node_id: Set(self.node_id),
            uptime: Set(info.uptime_secs as f64),
            load: Set(info.load_text()),
            log_time: Set(info.logged_at),
        };
        ss_node_info::Entity::insert(row).exec(&self.db).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(node_id = self.node_id))]
    async fn insert_online_count(&self, online: usize, at: i64) -> Result<()> {
        let online_user = i32::try_from(online)
            .map_err(|_| NodeError::DataIntegrity(format!("online count {} too large", online)))?;
        let row = ss_node_online_log::ActiveModel {
            id: NotSet,
            node_id: Set(self.node_id),
            online_user: Set(online_user),
            log_time: Set(at),
        };
        ss_node_online_log::Entity::insert(row).exec(&self.db).await?;
        Ok(())
    }
}

fn signed(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| NodeError::DataIntegrity(format!("{} {} exceeds column range", what, value)))
}
