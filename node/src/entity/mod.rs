//! Tables shared with the panel; names and columns are fixed by the panel schema.

pub mod ss_node;
pub mod ss_node_info;
pub mod ss_node_online_log;
pub mod user;
pub mod user_traffic_log;
