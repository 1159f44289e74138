pub(crate) use super::DbEntity;
pub(crate) use crate::error::WhoisDbError;
pub(crate) use async_trait::async_trait;
pub(crate) use log::debug;
pub(crate) use sqlx::postgres::PgRow;
pub(crate) use sqlx::{PgConnection, PgPool, Row};
