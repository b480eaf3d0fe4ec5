/// Everything needed to dial one connection attempt. Rebuilt per attempt;
/// a retry reuses the last config with the reconnection flag set so the
/// server can tell a resumed session from a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub api_key: String,
    pub user_id: String,
    pub is_reconnection: bool,
}

impl ConnectionConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            user_id: user_id.into(),
            is_reconnection: false,
        }
    }

    pub fn as_reconnection(mut self) -> Self {
        self.is_reconnection = true;
        self
    }
}
