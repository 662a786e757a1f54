//! Contract lookup: hands governance contract text to the model on request.

use async_trait::async_trait;
use buildloop_core::{ActionHandler, ActionName, ActionOutcome, ContractFetcher};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct FetchContractAction {
    fetcher: Arc<dyn ContractFetcher>,
}

impl FetchContractAction {
    pub fn new(fetcher: Arc<dyn ContractFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ActionHandler for FetchContractAction {
    fn action(&self) -> ActionName {
        ActionName::FetchContract
    }

    fn description(&self) -> &str {
        "Fetch the text of a governance contract (e.g. 'stack', 'style', 'security') \
         that the output must comply with."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "contract_type": {
                    "type": "string",
                    "description": "Which contract to fetch"
                }
            },
            "required": ["contract_type"]
        })
    }

    async fn execute(&self, input: Value) -> ActionOutcome {
        let Some(contract_type) = input["contract_type"].as_str() else {
            return ActionOutcome::error("missing required field 'contract_type'");
        };

        match self.fetcher.fetch(contract_type).await {
            Some(content) => ActionOutcome::Output(json!({
                "contract_type": contract_type,
                "content": content,
            })),
            None => ActionOutcome::error(format!("contract not found: {contract_type}")),
        }
    }
}

/// Contracts held in memory, keyed by type.
#[derive(Debug, Clone, Default)]
pub struct StaticContracts {
    contracts: std::collections::BTreeMap<String, String>,
}

impl StaticContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, contract_type: impl Into<String>, content: impl Into<String>) -> Self {
        self.contracts.insert(contract_type.into(), content.into());
        self
    }

    /// Load every `*.md` / `*.txt` file in `dir`, keyed by file stem.
    pub fn from_dir(dir: &std::path::Path) -> std::io::Result<Self> {
        let mut contracts = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_text = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("md" | "txt")
            );
            if let (true, Some(stem)) = (is_text, path.file_stem().and_then(|s| s.to_str())) {
                let stem = stem.to_string();
                contracts.contracts.insert(stem, std::fs::read_to_string(&path)?);
            }
        }
        Ok(contracts)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }
}

#[async_trait]
impl ContractFetcher for StaticContracts {
    async fn fetch(&self, contract_type: &str) -> Option<String> {
        self.contracts.get(contract_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> FetchContractAction {
        FetchContractAction::new(Arc::new(
            StaticContracts::new().with("style", "Use rustfmt defaults."),
        ))
    }

    #[tokio::test]
    async fn returns_contract_text() {
        let outcome = action().execute(json!({"contract_type": "style"})).await;
        match outcome {
            ActionOutcome::Output(v) => assert_eq!(v["content"], "Use rustfmt defaults."),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_contract_is_structured_error() {
        let outcome = action().execute(json!({"contract_type": "security"})).await;
        match outcome {
            ActionOutcome::Failed(v) => assert_eq!(v["error"], "contract not found: security"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_input_is_error() {
        assert!(action().execute(json!({"type": "style"})).await.is_error());
    }

    #[test]
    fn loads_contracts_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.md"), "fmt").unwrap();
        std::fs::write(dir.path().join("stack.txt"), "rust").unwrap();
        std::fs::write(dir.path().join("ignored.json"), "{}").unwrap();
        let contracts = StaticContracts::from_dir(dir.path()).unwrap();
        assert_eq!(contracts.types().collect::<Vec<_>>(), vec!["stack", "style"]);
    }
}
