use async_trait::async_trait;

use super::{repository, Database};
use crate::error::Result;

/// String key-value persistence the sync core writes its blobs through.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_value(conn, &key)
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_value(conn, &key, &value)
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.writer()
            .call({
                let key = key.to_string();
                move |conn| repository::delete_value(conn, &key)
            })
            .await?;
        Ok(())
    }
}

/// A store whose writes always fail, for exercising swallowed-failure paths.
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get_string(&self, _key: &str) -> Result<Option<String>> {
        Err(crate::error::Error::Database("disk I/O error".into()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(crate::error::Error::Database("database or disk is full".into()))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(crate::error::Error::Database("database or disk is full".into()))
    }
}
