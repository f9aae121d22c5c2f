//! Catalog of the objects a dump covers

mod model;
mod reader;

pub use model::*;
pub use reader::{fetch_ddl, fetch_user_ddl, read_catalog, read_server_info, read_users, DdlSelection};
