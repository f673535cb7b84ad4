//! Test fixtures for control service integration tests.

use chrono::{Duration, Utc};
use secrecy::SecretString;

use kubeserve_control::orchestration::{ImageRef, InstallParameters, ObjectStoreParams};
use kubeserve_control::{
    ArtifactLocation, DeploymentRecord, MemoryRegistry, ModelVersion, Replicas, TenantId,
    VersionId, VersionState,
};

pub const DEFAULT_REFERENCE: &str = "s3://models/7/model.pkl";

/// Builder for model versions registered with the test registry.
pub struct VersionBuilder {
    id: i64,
    owner: i64,
    state: VersionState,
    reference: String,
}

impl VersionBuilder {
    /// Creates a ready version owned by tenant 7.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            owner: 7,
            state: VersionState::Ready,
            reference: DEFAULT_REFERENCE.to_owned(),
        }
    }

    /// Sets the owning tenant.
    pub fn owned_by(mut self, owner: i64) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the lifecycle state.
    pub fn with_state(mut self, state: VersionState) -> Self {
        self.state = state;
        self
    }

    /// Sets the store reference.
    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = reference.to_owned();
        self
    }

    /// Builds the version.
    pub fn build(self) -> ModelVersion {
        ModelVersion {
            id: VersionId::new(self.id),
            owner: TenantId::new(self.owner),
            state: self.state,
            store_reference: self.reference,
        }
    }

    /// Registers the version and returns its id.
    pub fn register(self, registry: &MemoryRegistry) -> VersionId {
        let version = self.build();
        let id = version.id;
        registry.insert(version).unwrap();
        id
    }
}

/// A provisioning row created `age` ago, as a crashed workflow leaves it.
pub fn stale_record(version: i64, namespace: &str, age: Duration) -> DeploymentRecord {
    let mut record = DeploymentRecord::new(
        VersionId::new(version),
        namespace,
        Replicas::new(1, 10).unwrap(),
    );
    record.created_at = Utc::now() - age;
    record.updated_at = record.created_at;
    record
}

/// Parameters for releases installed behind the manager's back.
pub fn install_parameters() -> InstallParameters {
    InstallParameters {
        object_store: ObjectStoreParams {
            endpoint: "minio:9000".to_owned(),
            access_key: "minioadmin".to_owned(),
            secret_key: SecretString::from("minioadmin".to_owned()),
            use_ssl: false,
        },
        artifact_reference: DEFAULT_REFERENCE.to_owned(),
        artifact: ArtifactLocation::parse(DEFAULT_REFERENCE).unwrap(),
        replicas: Replicas::new(1, 10).unwrap(),
        image: ImageRef {
            repository: "kubeserve/inference-server".to_owned(),
            tag: "latest".to_owned(),
        },
        public_path: "/api/v1/predict/stale".to_owned(),
    }
}
