use redis::Client;
use redis::aio::ConnectionManager;

/// Open a Redis client for the given URL.
///
/// The client is kept alongside the manager because pub/sub needs a
/// dedicated connection that the manager cannot multiplex.
pub fn open_client(redis_url: &str) -> anyhow::Result<Client> {
    Ok(Client::open(redis_url)?)
}

/// Create a Redis connection manager for async operations.
pub async fn create_redis_pool(client: &Client) -> anyhow::Result<ConnectionManager> {
    let manager = ConnectionManager::new(client.clone()).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
