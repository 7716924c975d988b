//! Credential verification for responders.

use async_trait::async_trait;
use logsync_core::Verdict;
use logsync_types::NodeId;
use serde_json::Value;

/// Decides whether a peer may synchronize.
///
/// Called by a responder once per handshake, after the protocol version
/// was accepted.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Check the credentials a peer sent in `connect`.
    async fn verify(&self, node_id: &NodeId, credentials: Option<&Value>) -> Verdict;
}

/// Accepts every peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn verify(&self, _node_id: &NodeId, _credentials: Option<&Value>) -> Verdict {
        Verdict::Accept
    }
}

/// Accepts peers that present one fixed credential value.
#[derive(Debug, Clone)]
pub struct SharedToken {
    token: Value,
}

impl SharedToken {
    /// Expect exactly `token` as credentials.
    pub fn new(token: impl Into<Value>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Authenticator for SharedToken {
    async fn verify(&self, node_id: &NodeId, credentials: Option<&Value>) -> Verdict {
        match credentials {
            Some(given) if *given == self.token => Verdict::Accept,
            Some(_) => Verdict::reject(format!("bad credentials for {}", node_id)),
            None => Verdict::reject(format!("{} sent no credentials", node_id)),
        }
    }
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&NodeId, Option<&Value>) -> Verdict + Send + Sync,
{
    async fn verify(&self, node_id: &NodeId, credentials: Option<&Value>) -> Verdict {
        self(node_id, credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn shared_token_checks_value() {
        let auth = SharedToken::new("secret");
        let node = NodeId::new("client");

        assert!(auth.verify(&node, Some(&json!("secret"))).await.is_accepted());
        assert!(!auth.verify(&node, Some(&json!("guess"))).await.is_accepted());
        assert!(!auth.verify(&node, None).await.is_accepted());
    }

    #[tokio::test]
    async fn closures_are_authenticators() {
        let auth = |node: &NodeId, _: Option<&Value>| {
            if node.as_str().starts_with("trusted:") {
                Verdict::Accept
            } else {
                Verdict::reject("unknown node")
            }
        };

        assert!(auth
            .verify(&NodeId::new("trusted:1"), None)
            .await
            .is_accepted());
        assert_eq!(
            auth.verify(&NodeId::new("other"), None).await,
            Verdict::reject("unknown node")
        );
    }

    #[tokio::test]
    async fn allow_all_accepts() {
        assert!(AllowAll
            .verify(&NodeId::new("x"), Some(&json!(null)))
            .await
            .is_accepted());
    }
}
