//! AWS Bedrock adapter.
//!
//! Native Bedrock SigV4 signing needs the AWS SDK crates. Instead, this
//! adapter talks to Bedrock's OpenAI-compatible endpoint, e.g.
//!
//! ```toml
//! [[providers]]
//! id = "bedrock"
//! kind = "bedrock"
//! base_url = "https://bedrock-runtime.us-east-1.amazonaws.com/openai/v1"
//! api_key_env = "AWS_BEARER_TOKEN_BEDROCK"
//! ```
//!
//! with credentials issued externally (Bedrock API keys, IAM Roles Anywhere,
//! a credential helper, ...).

use af_domain::config::{ProviderConfig, ProviderKind};
use af_domain::error::Result;
use af_domain::spec::ResolvedSpec;
use serde_json::Value;

use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::{InvokeContext, Invoker, Outcome};

pub struct BedrockAdapter {
    inner: OpenAiCompatAdapter,
}

impl BedrockAdapter {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        if cfg.api_key_env.is_none() {
            tracing::warn!(
                provider_id = %cfg.id,
                "bedrock provider has no api_key_env; requests will be unauthenticated"
            );
        }
        Ok(Self {
            inner: OpenAiCompatAdapter::from_config(cfg)?,
        })
    }
}

#[async_trait::async_trait]
impl Invoker for BedrockAdapter {
    async fn invoke(&self, spec: &ResolvedSpec, input: &Value, ctx: &InvokeContext) -> Outcome {
        self.inner.invoke(spec, input, ctx).await
    }

    fn adapter_id(&self) -> &str {
        self.inner.adapter_id()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }
}
