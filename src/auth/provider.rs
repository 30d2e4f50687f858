//! OAuth login providers.
//!
//! A provider only knows where to send a browser to start a login. The code
//! exchange happens at the provider callback endpoint, outside the gateway,
//! which reports the result through `OAuthStateCache::resolve`.

use std::sync::Arc;

use crate::config::schema::OAuthConfig;

/// Errors raised by the OAuth flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    #[error("the OAuth provider is not supported, please check config: {0}")]
    UnsupportedProvider(String),
}

/// Builds the login entrance URL for a state token.
pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn entrance_url(&self, state: &str) -> String;
}

/// WeCom (WeChat Work) QR login.
#[derive(Debug, Clone)]
pub struct WxWorkProvider {
    pub corp_id: String,
    pub agent_id: String,
    pub callback: String,
}

impl OAuthProvider for WxWorkProvider {
    fn name(&self) -> &'static str {
        "wxwork"
    }

    fn entrance_url(&self, state: &str) -> String {
        format!(
            "https://open.work.weixin.qq.com/wwopen/sso/qrConnect?appid={}&agentid={}&redirect_uri={}&state={}",
            self.corp_id, self.agent_id, self.callback, state
        )
    }
}

/// DingTalk QR login.
#[derive(Debug, Clone)]
pub struct DingTalkProvider {
    pub app_id: String,
    pub callback: String,
}

impl OAuthProvider for DingTalkProvider {
    fn name(&self) -> &'static str {
        "dingtalk"
    }

    fn entrance_url(&self, state: &str) -> String {
        format!(
            "https://oapi.dingtalk.com/connect/qrconnect?appid={}&response_type=code&scope=snsapi_login&state={}&redirect_uri={}",
            self.app_id, state, self.callback
        )
    }
}

/// Feishu (Lark) login.
#[derive(Debug, Clone)]
pub struct FeishuProvider {
    pub app_id: String,
    pub callback: String,
}

impl OAuthProvider for FeishuProvider {
    fn name(&self) -> &'static str {
        "feishu"
    }

    fn entrance_url(&self, state: &str) -> String {
        format!(
            "https://open.feishu.cn/open-apis/authen/v1/index?redirect_uri={}&app_id={}&state={}",
            self.callback, self.app_id, state
        )
    }
}

/// Directory login form served by the gateway's own login page.
#[derive(Debug, Clone)]
pub struct LdapProvider {
    pub entrance: String,
}

impl OAuthProvider for LdapProvider {
    fn name(&self) -> &'static str {
        "ldap"
    }

    fn entrance_url(&self, state: &str) -> String {
        format!("{}?state={}", self.entrance, state)
    }
}

/// Construct the provider named in the OAuth configuration.
pub fn build_provider(config: &OAuthConfig) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
    let provider: Arc<dyn OAuthProvider> = match config.provider.as_str() {
        "wxwork" => Arc::new(WxWorkProvider {
            corp_id: config.wxwork.corp_id.clone(),
            agent_id: config.wxwork.agent_id.clone(),
            callback: config.wxwork.callback.clone(),
        }),
        "dingtalk" => Arc::new(DingTalkProvider {
            app_id: config.dingtalk.app_id.clone(),
            callback: config.dingtalk.callback.clone(),
        }),
        "feishu" => Arc::new(FeishuProvider {
            app_id: config.feishu.app_id.clone(),
            callback: config.feishu.callback.clone(),
        }),
        "ldap" => Arc::new(LdapProvider {
            entrance: config.ldap.entrance.clone(),
        }),
        other => return Err(OAuthError::UnsupportedProvider(other.to_string())),
    };
    Ok(provider)
}
