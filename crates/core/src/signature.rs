//! Signatures select an operation and the capability able to serve it.

use serde::{Deserialize, Serialize};

/// Capability of the queue hand-off (pull-style) dispatcher.
pub const SPACER: &str = "Spacer";

/// Capability of the direct (push-style) job dispatcher.
pub const JOBBER: &str = "Jobber";

/// Capability of the direct (push-style) block dispatcher.
pub const CONCATENATOR: &str = "Concatenator";

/// Operation name used by composite dispatchers.
pub const SERVICE_OP: &str = "service";

/// Role of a signature inside a fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureType {
    /// The main operation
    #[default]
    Process,
    /// Batch step executed before the process signature
    Pre,
    /// Batch step executed after the process signature
    Post,
}

/// Where the operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Locality {
    /// In-process computation, no executor resolution
    Local,
    /// Resolved through the directory
    #[default]
    Remote,
}

/// Deployment descriptor consumed by the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Artifact or configuration to deploy
    pub config: String,
    /// Number of instances wanted
    pub instances: u32,
}

/// Identifies an operation and the capability required to execute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Operation name
    pub operation: String,

    /// Required capability (service type)
    pub capability: String,

    /// Optional provider name hint
    pub provider: Option<String>,

    /// Process / pre / post
    pub kind: SignatureType,

    /// Local or remote execution
    pub locality: Locality,

    /// Deployment descriptor for on-demand provisioning
    pub deployment: Option<Deployment>,
}

impl Signature {
    /// Create a remote process signature.
    pub fn new(operation: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            capability: capability.into(),
            provider: None,
            kind: SignatureType::Process,
            locality: Locality::Remote,
            deployment: None,
        }
    }

    /// Create a local (in-process) process signature.
    pub fn local(operation: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::new(operation, capability).with_locality(Locality::Local)
    }

    /// Constrain the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the signature type.
    pub fn with_kind(mut self, kind: SignatureType) -> Self {
        self.kind = kind;
        self
    }

    /// Set the locality.
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    /// Attach a deployment descriptor.
    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.deployment = Some(deployment);
        self
    }

    /// True when no network capability is needed.
    pub fn is_local(&self) -> bool {
        self.locality == Locality::Local
    }

    /// True when this targets the queue hand-off capability.
    pub fn is_spacer(&self) -> bool {
        self.capability == SPACER
    }

    /// Default signature of a job.
    pub fn jobber() -> Self {
        Self::local(SERVICE_OP, JOBBER)
    }

    /// Default signature of a block.
    pub fn concatenator() -> Self {
        Self::local(SERVICE_OP, CONCATENATOR)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.capability, self.operation)?;
        if let Some(provider) = &self.provider {
            write!(f, "@{}", provider)?;
        }
        Ok(())
    }
}

/// A named alternative set of signatures for the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fidelity {
    /// Fidelity name
    pub name: String,

    /// Signatures; exactly one should be of type PROCESS
    pub signatures: Vec<Signature>,
}

impl Fidelity {
    /// Create a fidelity with a single process signature.
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signatures: vec![signature],
        }
    }

    /// Add a batch step.
    pub fn with(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// The process signature, falling back to the first one.
    pub fn process(&self) -> Option<&Signature> {
        self.signatures
            .iter()
            .find(|s| s.kind == SignatureType::Process)
            .or_else(|| self.signatures.first())
    }

    /// PRE signatures, then PROCESS, then POST, each group in declaration order.
    pub fn in_batch_order(&self) -> Vec<&Signature> {
        let of = |kind: SignatureType| self.signatures.iter().filter(move |s| s.kind == kind);
        of(SignatureType::Pre)
            .chain(of(SignatureType::Process))
            .chain(of(SignatureType::Post))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_order() {
        let fidelity = Fidelity::new("main", Signature::local("add", "Adder"))
            .with(Signature::local("post", "Audit").with_kind(SignatureType::Post))
            .with(Signature::local("pre", "Audit").with_kind(SignatureType::Pre));

        let ops: Vec<_> = fidelity.in_batch_order().iter().map(|s| s.operation.as_str()).collect();
        assert_eq!(ops, vec!["pre", "add", "post"]);
        assert_eq!(fidelity.process().unwrap().operation, "add");
    }

    #[test]
    fn test_display() {
        let sig = Signature::new("multiply", "Multiplier").with_provider("calc-1");
        assert_eq!(sig.to_string(), "Multiplier#multiply@calc-1");
        assert!(!sig.is_local());
        assert!(Signature::jobber().is_local());
    }
}
