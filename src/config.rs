use serde::Deserialize;

/// Settings for a [`CallGraph`](crate::graph::CallGraph).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CallGraphConfig {
    /// When false, `initialize` does nothing and the graph stays empty.
    pub active: bool,
    /// Turn `LambdaMetafactory` call sites into direct calls to the lambda body.
    pub unwrap_lambdas: bool,
}

impl Default for CallGraphConfig {
    fn default() -> Self {
        Self {
            active: true,
            unwrap_lambdas: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: CallGraphConfig =
            serde_json::from_str(r#"{"unwrap_lambdas": false}"#).expect("parse config");

        assert!(config.active);
        assert!(!config.unwrap_lambdas);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<CallGraphConfig>(r#"{"enabled": true}"#);

        assert!(result.is_err());
    }
}
