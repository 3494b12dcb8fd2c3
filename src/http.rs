use once_cell::sync::OnceCell;
use reqwest::Client;
use std::time::Duration;

/// 全局复用的 HTTP Client（统一连接池/Keep-Alive），避免每次探测重复创建。
///
/// 说明：
/// - 各调用点的超时不同，统一在请求级别通过 `RequestBuilder::timeout` 设置。
/// - `Client` 本身是线程安全的，适合全局复用。
static CLIENT_DEFAULT: OnceCell<Client> = OnceCell::new();

/// 建连超时：探活请求不应在握手阶段长时间挂起。
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// 默认配置的 HTTP Client，用于搜索集群与外部服务探活。
pub fn client_default() -> Result<&'static Client, reqwest::Error> {
    CLIENT_DEFAULT.get_or_try_init(|| {
        Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("saas-backend/", env!("CARGO_PKG_VERSION")))
            .build()
    })
}
