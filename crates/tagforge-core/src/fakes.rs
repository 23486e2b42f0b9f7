//! In-memory collaborators for tests.
//!
//! Provides `StaticRefLister`, `FailingRefLister`, `FakeImageBuilder` and
//! `RecordingRegistry`, which satisfy the collaborator traits without git,
//! docker or network access.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{BuildSpec, ImageHandle, RegistryCredential};
use crate::error::TransportError;
use crate::executor::{BuildRequest, BuiltImage, ImageBuilder};
use crate::labels::LABEL_BASE_NAME;
use crate::publisher::{PublishRequest, RegistryClient};
use crate::source::RefLister;

type SpecPredicate = Arc<dyn Fn(&BuildSpec) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// StaticRefLister
// ---------------------------------------------------------------------------

/// Returns a fixed `ls-remote` style listing for any repository.
#[derive(Debug, Default)]
pub struct StaticRefLister {
    listing: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticRefLister {
    pub fn new(listing: impl Into<String>) -> Self {
        Self {
            listing: listing.into(),
            ..Self::default()
        }
    }

    /// Build a listing with one `refs/tags/<name>` line per tag name.
    pub fn from_tag_names(names: &[&str]) -> Self {
        let listing = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{:040x}\trefs/tags/{name}\n", i + 1))
            .collect::<String>();
        Self::new(listing)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefLister for StaticRefLister {
    async fn list_tag_refs(&self, _repository: &str) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.listing.clone())
    }
}

// ---------------------------------------------------------------------------
// FailingRefLister
// ---------------------------------------------------------------------------

/// Always fails with the configured error.
#[derive(Debug)]
pub struct FailingRefLister {
    error: TransportError,
}

impl FailingRefLister {
    pub fn new(error: TransportError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl RefLister for FailingRefLister {
    async fn list_tag_refs(&self, _repository: &str) -> Result<String, TransportError> {
        Err(self.error.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeImageBuilder
// ---------------------------------------------------------------------------

/// Records every build request and succeeds unless told otherwise.
///
/// Images are named `fake://<flavour>/<runtime>/<version>/<platform>` and
/// carry a base image label of `php:<runtime>-<flavour>`.
#[derive(Default)]
pub struct FakeImageBuilder {
    fail_when: Option<SpecPredicate>,
    panic_when: Option<SpecPredicate>,
    delay: Option<Duration>,
    calls: Mutex<Vec<BuildRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_when(mut self, predicate: impl Fn(&BuildSpec) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Arc::new(predicate));
        self
    }

    pub fn panicking_when(
        mut self,
        predicate: impl Fn(&BuildSpec) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.panic_when = Some(Arc::new(predicate));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Specs in the order their builds started.
    pub fn calls(&self) -> Vec<BuildSpec> {
        self.requests().into_iter().map(|r| r.spec).collect()
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of builds observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBuilder for FakeImageBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let spec = &request.spec;
        if self.panic_when.as_ref().is_some_and(|p| p(spec)) {
            panic!("fake builder panic for {spec}");
        }
        if self.fail_when.as_ref().is_some_and(|p| p(spec)) {
            return Err(TransportError::failed(format!("fake build failure for {spec}")));
        }

        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_BASE_NAME.to_string(),
            format!("php:{}-{}", spec.runtime_version, spec.flavour),
        );
        Ok(BuiltImage {
            image: ImageHandle::new(format!(
                "fake://{}/{}/{}/{}",
                spec.flavour, spec.runtime_version, spec.app_version, spec.platform
            )),
            labels,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingRegistry
// ---------------------------------------------------------------------------

/// Records every publish call. Fails for references whose tag is listed
/// via [`RecordingRegistry::failing_for`].
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    failing_tags: Vec<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<PublishRequest>>,
    usernames: Mutex<Vec<String>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, tag: impl Into<String>) -> Self {
        self.failing_tags.push(tag.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<PublishRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Usernames of the credentials used, one per call.
    pub fn usernames(&self) -> Vec<String> {
        self.usernames.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &RegistryCredential,
    ) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        self.usernames
            .lock()
            .unwrap()
            .push(credential.username.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let tag = request
            .reference
            .rsplit_once(':')
            .map(|(_, tag)| tag)
            .unwrap_or_default();
        if self.failing_tags.iter().any(|t| t == tag) {
            return Err(TransportError::failed(format!(
                "registry rejected {}",
                request.reference
            )));
        }
        Ok(request.reference.clone())
    }
}
