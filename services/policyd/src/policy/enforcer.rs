//! Build a policy engine from a model file and a published policy file.
use super::PolicyError;
use async_trait::async_trait;
use casbin::{CoreApi, DefaultModel, Enforcer, FileAdapter};
use gatehouse_authz::{AuthzError, PolicyEngine};
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait EnforcerFactory: Send + Sync {
    async fn build(
        &self,
        model_path: &Path,
        policy_path: &Path,
    ) -> Result<Arc<dyn PolicyEngine>, PolicyError>;
}

/// Loads the model and policy files with Casbin's file adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CasbinEnforcerFactory;

#[async_trait]
impl EnforcerFactory for CasbinEnforcerFactory {
    async fn build(
        &self,
        model_path: &Path,
        policy_path: &Path,
    ) -> Result<Arc<dyn PolicyEngine>, PolicyError> {
        let model = DefaultModel::from_file(model_path)
            .await
            .map_err(|err| AuthzError::InvalidModel(format!("{}: {err}", model_path.display())))?;
        let adapter = FileAdapter::new(policy_path.to_path_buf());
        let enforcer = Enforcer::new(model, adapter)
            .await
            .map_err(AuthzError::from)?;
        Ok(Arc::new(enforcer))
    }
}
