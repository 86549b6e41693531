//! Per-operation key naming

/// Builds the namespaced keys an operation occupies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationKeys {
    prefix: String,
}

impl OperationKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Latest snapshot (string)
    pub fn state(&self, operation_id: &str) -> String {
        format!("{}_state:{}", self.prefix, operation_id)
    }

    /// Bounded step-history log (list, newest at head)
    pub fn steps(&self, operation_id: &str) -> String {
        format!("{}_steps:{}", self.prefix, operation_id)
    }

    /// Operation metadata (hash)
    pub fn meta(&self, operation_id: &str) -> String {
        format!("{}_meta:{}", self.prefix, operation_id)
    }

    /// Bounded events log (list, newest at head)
    pub fn events(&self, operation_id: &str) -> String {
        format!("{}_events:{}", self.prefix, operation_id)
    }

    /// Live event stream
    pub fn stream(&self, operation_id: &str) -> String {
        format!("{}_stream:{}", self.prefix, operation_id)
    }

    /// Every key the state store owns for an operation
    pub fn all_state_keys(&self, operation_id: &str) -> [String; 4] {
        [
            self.state(operation_id),
            self.steps(operation_id),
            self.meta(operation_id),
            self.events(operation_id),
        ]
    }

    pub fn meta_pattern(&self) -> String {
        format!("{}_meta:*", self.prefix)
    }

    pub fn stream_pattern(&self) -> String {
        format!("{}_stream:*", self.prefix)
    }

    /// Recover the operation id from a metadata key
    pub fn operation_from_meta(&self, key: &str) -> Option<String> {
        key.strip_prefix(&format!("{}_meta:", self.prefix))
            .map(str::to_string)
    }

    pub fn operation_from_stream(&self, key: &str) -> Option<String> {
        key.strip_prefix(&format!("{}_stream:", self.prefix))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let keys = OperationKeys::new("agent_runtime");
        assert_eq!(keys.state("op-1"), "agent_runtime_state:op-1");
        assert_eq!(keys.steps("op-1"), "agent_runtime_steps:op-1");
        assert_eq!(keys.meta("op-1"), "agent_runtime_meta:op-1");
        assert_eq!(keys.events("op-1"), "agent_runtime_events:op-1");
        assert_eq!(keys.stream("op-1"), "agent_runtime_stream:op-1");
    }

    #[test]
    fn operation_id_recovered_from_key() {
        let keys = OperationKeys::new("rt");
        assert_eq!(
            keys.operation_from_meta("rt_meta:op:with:colons").as_deref(),
            Some("op:with:colons")
        );
        assert_eq!(keys.operation_from_meta("other_meta:op"), None);
        assert_eq!(
            keys.operation_from_stream("rt_stream:abc").as_deref(),
            Some("abc")
        );
    }
}
