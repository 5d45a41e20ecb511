//! What a transformation sees and returns.

use std::path::PathBuf;

use crate::config::StageParams;
use crate::core::ItemKey;

/// One input artifact, already read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArtifact {
    /// The item key of the input.
    pub key: ItemKey,
    /// The declared upstream this input satisfies.
    pub dependency: String,
    /// The stage that actually wrote the data. Differs from `dependency`
    /// when the declared upstream is disabled and passes its input through.
    pub producer: String,
    /// Where the data was read from.
    pub location: PathBuf,
    /// The raw bytes.
    pub data: Vec<u8>,
}

/// Everything a transformation needs to compute one work unit.
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// The stage being computed.
    pub stage: &'a str,
    /// Output keys, one payload expected per key.
    pub outputs: &'a [ItemKey],
    /// Per-item inputs: primary inputs first (in key order), then secondary
    /// upstreams.
    pub inputs: &'a [InputArtifact],
    /// Shared inputs such as master calibrations.
    pub shared: &'a [InputArtifact],
    /// The stage's configured parameters.
    pub params: &'a StageParams,
}

impl<'a> TransformRequest<'a> {
    /// Returns the first primary input.
    #[must_use]
    pub fn primary(&self) -> Option<&'a InputArtifact> {
        let inputs: &'a [InputArtifact] = self.inputs;
        inputs.first()
    }

    /// Returns every input satisfying `dependency`.
    pub fn inputs_from<'b>(
        &self,
        dependency: &'b str,
    ) -> impl Iterator<Item = &'a InputArtifact> + 'b
    where
        'a: 'b,
    {
        let inputs: &'a [InputArtifact] = self.inputs;
        inputs
            .iter()
            .filter(move |input| input.dependency == dependency)
    }

    /// Returns the shared input read from `stage`, if present.
    #[must_use]
    pub fn shared_from(&self, stage: &str) -> Option<&'a InputArtifact> {
        let shared: &'a [InputArtifact] = self.shared;
        shared.iter().find(|input| input.dependency == stage)
    }
}

/// Output payloads of one work unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Produced {
    outputs: Vec<Vec<u8>>,
}

impl Produced {
    /// One output.
    #[must_use]
    pub fn single(data: impl Into<Vec<u8>>) -> Self {
        Self {
            outputs: vec![data.into()],
        }
    }

    /// Several outputs, in the order of the request's output keys.
    #[must_use]
    pub const fn many(outputs: Vec<Vec<u8>>) -> Self {
        Self { outputs }
    }

    /// Number of payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns true if nothing was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Consumes into the payloads.
    #[must_use]
    pub fn into_outputs(self) -> Vec<Vec<u8>> {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(key: &str, dependency: &str) -> InputArtifact {
        InputArtifact {
            key: ItemKey::new(key),
            dependency: dependency.to_string(),
            producer: dependency.to_string(),
            location: PathBuf::from(format!("/p/{dependency}/{key}.fits")),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_request_accessors() {
        let inputs = [
            artifact("a", "collapse"),
            artifact("b", "collapse"),
            artifact("a", "centroid"),
        ];
        let shared = [artifact("__summary__", "master_dark")];
        let outputs = [ItemKey::new("a")];
        let params = StageParams::default();
        let request = TransformRequest {
            stage: "register",
            outputs: &outputs,
            inputs: &inputs,
            shared: &shared,
            params: &params,
        };

        assert_eq!(request.primary().unwrap().key.as_str(), "a");
        assert_eq!(request.inputs_from("collapse").count(), 2);
        assert_eq!(request.inputs_from("centroid").count(), 1);
        assert!(request.shared_from("master_dark").is_some());
        assert!(request.shared_from("master_flat").is_none());
    }

    #[test]
    fn test_produced() {
        assert_eq!(Produced::single(b"x".to_vec()).len(), 1);
        assert!(Produced::default().is_empty());
    }
}
