//! Redis-backed SharedStore.
//!
//! Uses the multiplexed connection manager, which reconnects on its own.
//! Each call is bounded by the configured store timeout so a hung server
//! can never wedge a control loop.

use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::debug;

use fleet_core::RedisConfig;

use crate::error::{StateError, StateResult};
use crate::store::{SharedStore, StoreFuture};

/// SharedStore over a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    /// Connect and ping the server. Fails if it is unreachable.
    pub async fn connect(config: &RedisConfig) -> StateResult<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        };
        let client =
            redis::Client::open(info).map_err(|e| StateError::Connect(e.to_string()))?;

        let conn = tokio::time::timeout(config.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StateError::Timeout(config.timeout))?
            .map_err(|e| StateError::Connect(e.to_string()))?;

        let store = Self {
            conn,
            timeout: config.timeout,
        };
        let pong: String = store.query(redis::cmd("PING")).await?;
        debug!(host = %config.host, port = config.port, db = config.db, %pong, "redis store connected");
        Ok(store)
    }

    /// Run one command under the store timeout.
    async fn query<T>(&self, cmd: redis::Cmd) -> StateResult<T>
    where
        T: redis::FromRedisValue + Send,
    {
        let mut conn = self.conn.clone();
        bounded(self.timeout, async move { cmd.query_async(&mut conn).await }).await
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> StateResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.kind() == redis::ErrorKind::TypeError => {
            Err(StateError::WrongType(e.to_string()))
        }
        Ok(Err(e)) => Err(StateError::Unavailable(e.to_string())),
        Err(_) => Err(StateError::Timeout(timeout)),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis.
    (ttl.as_millis() as u64).max(1)
}

impl SharedStore for RedisStore {
    fn set_nx_px<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value).arg("NX").arg("PX").arg(ttl_millis(ttl));
            let reply: Option<String> = self.query(cmd).await?;
            Ok(reply.is_some())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut cmd = redis::cmd("GET");
            cmd.arg(key);
            self.query(cmd).await
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            self.query(cmd).await
        })
    }

    fn set_px<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
            self.query(cmd).await
        })
    }

    fn del<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(key);
            let removed: i64 = self.query(cmd).await?;
            Ok(removed > 0)
        })
    }

    fn sadd<'a>(&'a self, key: &'a str, member: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(key).arg(member);
            let _added: i64 = self.query(cmd).await?;
            Ok(())
        })
    }

    fn smembers<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut cmd = redis::cmd("SMEMBERS");
            cmd.arg(key);
            self.query(cmd).await
        })
    }

    fn srem<'a>(&'a self, key: &'a str, members: &'a [String]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if members.is_empty() {
                return Ok(());
            }
            let mut cmd = redis::cmd("SREM");
            cmd.arg(key).arg(members);
            let _removed: i64 = self.query(cmd).await?;
            Ok(())
        })
    }
}
