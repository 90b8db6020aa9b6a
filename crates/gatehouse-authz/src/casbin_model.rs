use crate::errors::{AuthzError, AuthzResult};
use casbin::prelude::DefaultModel;

// Role ids are policy subjects directly; there is no grouping section because
// user -> role resolution happens before enforcement.
const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && keyMatch2(r.obj, p.obj) && r.act == p.act
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> AuthzResult<DefaultModel> {
    DefaultModel::from_str(MODEL)
        .await
        .map_err(|err| AuthzError::InvalidModel(err.to_string()))
}
