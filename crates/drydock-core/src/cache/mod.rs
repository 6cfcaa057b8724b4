//! Redis slot allocation for freshly deployed instances.
//!
//! Each instance gets its own logical Redis database. Db 0 is shared and
//! never handed out.

use anyhow::bail;
use tracing::debug;

const DEFAULT_DATABASE_COUNT: u32 = 16;

/// Find the first empty logical database above db 0 on the given server.
///
/// A database is empty when `DBSIZE` reports zero keys. Concurrent callers
/// may be handed the same index; the check is best-effort.
pub async fn find_empty_slot(host: &str, port: u16) -> anyhow::Result<u32> {
    let client = redis::Client::open(format!("redis://{host}:{port}/"))?;
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(e) => bail!(
            "[Redis Connection Error] Could not connect to Redis at {host}:{port}. \
             Error: {e}. Make sure the Redis server is running and reachable, \
             or pass an explicit database index with --redis-db."
        ),
    };

    let database_count = configured_database_count(&mut conn).await;
    debug!(host, port, database_count, "scanning for an empty redis database");

    for index in 1..database_count {
        redis::cmd("SELECT")
            .arg(index)
            .query_async::<()>(&mut conn)
            .await?;
        let records: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        if records == 0 {
            debug!(index, "found empty redis database");
            return Ok(index);
        }
        debug!(index, records, "redis database in use");
    }

    bail!(
        "[Redis Configuration Error] Could not find an empty Redis database on \
         {host}:{port}. All {} databases (1-{}) are in use. Free one up, raise \
         the `databases` setting in redis.conf, or pass an explicit index with \
         --redis-db.",
        database_count - 1,
        database_count - 1
    )
}

/// Ask the server how many logical databases it has, falling back to the
/// stock default when CONFIG GET is unavailable (managed Redis often
/// disables it).
async fn configured_database_count(conn: &mut redis::aio::MultiplexedConnection) -> u32 {
    let reply: Result<Vec<String>, _> = redis::cmd("CONFIG")
        .arg("GET")
        .arg("databases")
        .query_async(conn)
        .await;
    match reply {
        Ok(pair) => pair
            .get(1)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_DATABASE_COUNT),
        Err(e) => {
            debug!(error = %e, "CONFIG GET databases failed, assuming default");
            DEFAULT_DATABASE_COUNT
        }
    }
}
