//! Typestate pattern for the deployment state machine.
//!
//! Deployment states are encoded in the type system so that the orchestrator
//! cannot, for example, record a URL for a deployment that is being torn
//! down, or tear down one whose provisioning has not resolved.
//!
//! ```text
//! (Requested) ──▶ Provisioning ──▶ Live ──▶ TearingDown ──▶ Gone
//!                      │                        ▲
//!                      ├──────────▶ RolledBack  │
//!                      └────────────────────────┘  (stale rows only)
//! ```
//!
//! `Requested` is the validation step before a row exists, so it carries no
//! data and has no type here. Only `Provisioning` and `Live` are ever
//! persisted; see [`Phase`].

use std::marker::PhantomData;

use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentId, DeploymentRecord, Phase, ReleaseName};

// =============================================================================
// State marker types (zero-sized)
// =============================================================================

/// Marker trait for deployment states.
pub trait DeploymentState: private::Sealed + Send + Sync {
    /// Get the state name for logs and error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Row inserted, external install and expose in flight.
#[derive(Debug, Clone, Copy)]
pub struct Provisioning;

/// Release installed, route exposed, URL recorded.
#[derive(Debug, Clone, Copy)]
pub struct Live;

/// Provisioning failed; compensation ran and the row is being removed.
#[derive(Debug, Clone, Copy)]
pub struct RolledBack;

/// Delete requested; route and release are being removed.
#[derive(Debug, Clone, Copy)]
pub struct TearingDown;

/// Row removed.
#[derive(Debug, Clone, Copy)]
pub struct Gone;

impl private::Sealed for Provisioning {}
impl private::Sealed for Live {}
impl private::Sealed for RolledBack {}
impl private::Sealed for TearingDown {}
impl private::Sealed for Gone {}

impl DeploymentState for Provisioning {
    fn name() -> &'static str {
        "provisioning"
    }
}

impl DeploymentState for Live {
    fn name() -> &'static str {
        "live"
    }
}

impl DeploymentState for RolledBack {
    fn name() -> &'static str {
        "rolled_back"
    }
}

impl DeploymentState for TearingDown {
    fn name() -> &'static str {
        "tearing_down"
    }
}

impl DeploymentState for Gone {
    fn name() -> &'static str {
        "gone"
    }
}

// =============================================================================
// Deployment struct parameterised by state
// =============================================================================

/// A deployment in a specific state.
#[derive(Debug)]
pub struct Deployment<S: DeploymentState> {
    record: DeploymentRecord,
    _state: PhantomData<S>,
}

impl<S: DeploymentState> Deployment<S> {
    /// Get a reference to the deployment record.
    #[must_use]
    pub const fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    /// Get the deployment ID.
    #[must_use]
    pub const fn id(&self) -> &DeploymentId {
        &self.record.id
    }

    /// Get the release name.
    #[must_use]
    pub const fn release(&self) -> &ReleaseName {
        &self.record.release_name
    }

    /// Get the tenant namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.record.namespace
    }

    /// Get the state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        S::name()
    }

    /// Convert into the underlying record (consuming the deployment).
    #[must_use]
    pub fn into_record(self) -> DeploymentRecord {
        self.record
    }

    fn transition<T: DeploymentState>(self) -> Deployment<T> {
        Deployment {
            record: self.record,
            _state: PhantomData,
        }
    }

    fn transition_with<T: DeploymentState>(
        mut self,
        f: impl FnOnce(&mut DeploymentRecord),
    ) -> Deployment<T> {
        f(&mut self.record);
        self.record.updated_at = chrono::Utc::now();
        Deployment {
            record: self.record,
            _state: PhantomData,
        }
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl Deployment<Provisioning> {
    /// Start provisioning a freshly created record.
    #[must_use]
    pub const fn begin(record: DeploymentRecord) -> Self {
        Self {
            record,
            _state: PhantomData,
        }
    }

    /// Record the public URL; the only transition that makes a deployment live.
    #[must_use]
    pub fn go_live(self, url: String) -> Deployment<Live> {
        self.transition_with(|record| {
            record.url = Some(url);
        })
    }

    /// Provisioning failed and has been compensated.
    #[must_use]
    pub fn roll_back(self) -> Deployment<RolledBack> {
        self.transition()
    }

    /// Tear down a row whose provisioning workflow never resolved.
    ///
    /// Only reachable for rows left behind by a crashed process; a live
    /// workflow holds the row lock until it reaches `Live` or `RolledBack`.
    #[must_use]
    pub fn abandon(self) -> Deployment<TearingDown> {
        self.transition()
    }
}

impl Deployment<Live> {
    /// Start tearing down a live deployment.
    #[must_use]
    pub fn tear_down(self) -> Deployment<TearingDown> {
        self.transition()
    }
}

impl Deployment<TearingDown> {
    /// The row has been removed.
    #[must_use]
    pub fn finish(self) -> Deployment<Gone> {
        self.transition()
    }
}

// =============================================================================
// Loading from persisted state
// =============================================================================

/// A deployment loaded from the store, in whichever phase its row implies.
#[derive(Debug)]
pub enum AnyDeployment {
    /// Row without a URL.
    Provisioning(Deployment<Provisioning>),
    /// Row with a URL.
    Live(Deployment<Live>),
}

impl AnyDeployment {
    /// Classify a stored record.
    #[must_use]
    pub const fn from_record(record: DeploymentRecord) -> Self {
        match record.phase() {
            Phase::Provisioning => Self::Provisioning(Deployment {
                record,
                _state: PhantomData,
            }),
            Phase::Live => Self::Live(Deployment {
                record,
                _state: PhantomData,
            }),
        }
    }

    /// Get a reference to the deployment record.
    #[must_use]
    pub const fn record(&self) -> &DeploymentRecord {
        match self {
            Self::Provisioning(d) => d.record(),
            Self::Live(d) => d.record(),
        }
    }

    /// Get the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Provisioning(_) => Phase::Provisioning,
            Self::Live(_) => Phase::Live,
        }
    }

    /// Begin teardown from whichever phase the row is in.
    #[must_use]
    pub fn into_tearing_down(self) -> Deployment<TearingDown> {
        match self {
            Self::Provisioning(d) => d.abandon(),
            Self::Live(d) => d.tear_down(),
        }
    }

    /// Try to extract a provisioning deployment.
    pub fn try_into_provisioning(self) -> ControlResult<Deployment<Provisioning>> {
        match self {
            Self::Provisioning(d) => Ok(d),
            Self::Live(d) => Err(ControlError::internal(format!(
                "deployment {} is already live",
                d.id()
            ))),
        }
    }

    /// Try to extract a live deployment.
    pub fn try_into_live(self) -> ControlResult<Deployment<Live>> {
        match self {
            Self::Live(d) => Ok(d),
            Self::Provisioning(d) => Err(ControlError::internal(format!(
                "deployment {} is still provisioning",
                d.id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Replicas, VersionId};

    fn test_record() -> DeploymentRecord {
        DeploymentRecord::new(VersionId::new(7), "user-1", Replicas::new(1, 10).unwrap())
    }

    #[test]
    fn happy_path_transitions() {
        let provisioning = Deployment::<Provisioning>::begin(test_record());
        assert_eq!(provisioning.state_name(), "provisioning");
        assert!(provisioning.record().url.is_none());

        let live = provisioning.go_live("http://localhost/api/v1/predict/r".to_owned());
        assert_eq!(live.state_name(), "live");
        assert_eq!(live.record().phase(), Phase::Live);

        let gone = live.tear_down().finish();
        assert_eq!(gone.state_name(), "gone");
    }

    #[test]
    fn go_live_bumps_updated_at() {
        let provisioning = Deployment::<Provisioning>::begin(test_record());
        let created = provisioning.record().updated_at;
        let live = provisioning.go_live("http://h/p/r".to_owned());
        assert!(live.record().updated_at >= created);
        assert_eq!(live.record().created_at, created);
    }

    #[test]
    fn roll_back_keeps_release_name() {
        let provisioning = Deployment::<Provisioning>::begin(test_record());
        let release = provisioning.release().clone();
        let rolled_back = provisioning.roll_back();
        assert_eq!(rolled_back.release(), &release);
        assert_eq!(rolled_back.state_name(), "rolled_back");
    }

    #[test]
    fn any_deployment_classifies_by_url() {
        let record = test_record();
        let id = record.id.clone();

        let any = AnyDeployment::from_record(record.clone());
        assert_eq!(any.phase(), Phase::Provisioning);
        assert!(any.try_into_live().is_err());

        let mut live_record = record;
        live_record.url = Some("http://h/p/r".to_owned());
        let any = AnyDeployment::from_record(live_record);
        assert_eq!(any.phase(), Phase::Live);
        assert_eq!(any.try_into_live().unwrap().id(), &id);
    }

    #[test]
    fn stale_provisioning_rows_can_be_torn_down() {
        let any = AnyDeployment::from_record(test_record());
        let tearing_down = any.into_tearing_down();
        assert_eq!(tearing_down.state_name(), "tearing_down");
    }
}
