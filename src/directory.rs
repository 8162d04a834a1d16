//! Endpoint enumeration and selection.
//!
//! A [`DeviceDirectory`] is a snapshot: every enumeration builds a new one
//! from scratch, and the worker swaps it in wholesale.

use crate::host::{AudioHost, Direction, EndpointId};
use crate::StreamDeviceError;

/// Display name used when an endpoint's name cannot be read.
pub const UNKNOWN_NAME: &str = "Unknown Device Name";

/// GUID used when an endpoint's GUID cannot be read.
pub const UNKNOWN_GUID: &str = "Unknown Device GUID";

/// One enumerated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Display name, unique within its directory.
    pub name: String,
    /// Endpoint GUID, or [`UNKNOWN_GUID`].
    pub guid: String,
    /// Host identifier used to activate the endpoint.
    pub id: EndpointId,
}

/// Ordered, deduplicated list of endpoints for one direction.
///
/// The system default endpoint, when there is one, comes first. Colliding
/// display names get a numeric suffix: `"Foo"`, `"Foo #2"`, `"Foo #3"`.
///
/// # Example
///
/// ```
/// use stream_device::directory::DeviceDirectory;
/// use stream_device::host::mock::MockHost;
/// use stream_device::host::Direction;
///
/// let mut host = MockHost::new()
///     .with_endpoint(Direction::Playback, "Speakers", "{a}")
///     .with_endpoint(Direction::Playback, "Speakers", "{b}");
///
/// let directory = DeviceDirectory::enumerate(&mut host, Direction::Playback)?;
/// let names: Vec<&str> = directory.names().collect();
/// assert_eq!(names, ["Speakers", "Speakers #2"]);
/// # Ok::<(), stream_device::StreamDeviceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDirectory {
    direction: Direction,
    endpoints: Vec<Endpoint>,
    has_default: bool,
}

impl DeviceDirectory {
    /// An empty directory, as before the first enumeration.
    #[must_use]
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            endpoints: Vec::new(),
            has_default: false,
        }
    }

    /// Queries the host for all endpoints of a direction.
    ///
    /// Endpoints whose properties cannot be read are still listed, under
    /// the sentinel name and GUID.
    ///
    /// # Errors
    ///
    /// Returns [`StreamDeviceError::Enumeration`] if the endpoint collection
    /// itself cannot be queried.
    pub fn enumerate(
        host: &mut dyn AudioHost,
        direction: Direction,
    ) -> Result<Self, StreamDeviceError> {
        let ids = host
            .endpoints(direction)
            .map_err(|e| StreamDeviceError::Enumeration {
                direction,
                reason: e.to_string(),
            })?;

        let default = host.default_endpoint(direction).unwrap_or_else(|e| {
            tracing::warn!(%direction, error = %e, "Default endpoint lookup failed");
            None
        });

        let mut endpoints: Vec<Endpoint> = Vec::with_capacity(ids.len() + 1);
        if let Some(id) = &default {
            let endpoint = describe(host, id, &endpoints);
            endpoints.push(endpoint);
        }
        for id in ids {
            if default.as_ref() == Some(&id) {
                continue;
            }
            let endpoint = describe(host, &id, &endpoints);
            endpoints.push(endpoint);
        }

        tracing::debug!(%direction, count = endpoints.len(), "Enumerated endpoints");
        Ok(Self {
            direction,
            endpoints,
            has_default: default.is_some(),
        })
    }

    /// Direction of the listed endpoints.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// All endpoints, default first.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoints were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The system default endpoint.
    #[must_use]
    pub fn default_endpoint(&self) -> Option<&Endpoint> {
        if self.has_default {
            self.endpoints.first()
        } else {
            None
        }
    }

    /// Display names in directory order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.name.as_str())
    }

    /// Finds an endpoint by display name, then GUID, then device id.
    #[must_use]
    pub fn select(&self, selector: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.name == selector)
            .or_else(|| self.endpoints.iter().find(|e| e.guid == selector))
            .or_else(|| self.endpoints.iter().find(|e| e.id.as_str() == selector))
    }

    /// Display names separated by NUL and terminated by an extra NUL.
    ///
    /// An empty directory yields `"\0\0"`.
    #[must_use]
    pub fn name_list(&self) -> String {
        let mut list = String::new();
        for name in self.names() {
            list.push_str(name);
            list.push('\0');
        }
        if list.is_empty() {
            list.push('\0');
        }
        list.push('\0');
        list
    }
}

fn describe(host: &mut dyn AudioHost, id: &EndpointId, taken: &[Endpoint]) -> Endpoint {
    let name = host.friendly_name(id).unwrap_or_else(|e| {
        tracing::warn!(endpoint = %id, error = %e, "Endpoint name unavailable");
        UNKNOWN_NAME.to_string()
    });
    let guid = host.endpoint_guid(id).unwrap_or_else(|e| {
        tracing::debug!(endpoint = %id, error = %e, "Endpoint GUID unavailable");
        UNKNOWN_GUID.to_string()
    });
    Endpoint {
        name: unique_name(name, taken),
        guid,
        id: id.clone(),
    }
}

fn unique_name(base: String, taken: &[Endpoint]) -> String {
    let is_taken = |candidate: &str| taken.iter().any(|e| e.name == candidate);
    if !is_taken(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base} #{suffix}");
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use std::collections::HashSet;

    #[test]
    fn test_default_comes_first() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Playback, "HDMI", "{hdmi}")
            .with_endpoint(Direction::Playback, "Speakers", "{spk}")
            .with_default(Direction::Playback, 1);

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Playback).unwrap();
        let names: Vec<&str> = dir.names().collect();
        assert_eq!(names, ["Speakers", "HDMI"]);
        assert_eq!(dir.default_endpoint().unwrap().guid, "{spk}");
    }

    #[test]
    fn test_no_default() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Capture, "Mic", "{mic}")
            .without_default(Direction::Capture);

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Capture).unwrap();
        assert_eq!(dir.len(), 1);
        assert!(dir.default_endpoint().is_none());
    }

    #[test]
    fn test_suffixes_on_collision() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Playback, "Foo", "{1}")
            .with_endpoint(Direction::Playback, "Foo", "{2}")
            .with_endpoint(Direction::Playback, "Foo #2", "{3}")
            .with_endpoint(Direction::Playback, "Foo", "{4}");

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Playback).unwrap();
        let names: Vec<&str> = dir.names().collect();
        assert_eq!(names, ["Foo", "Foo #2", "Foo #2 #2", "Foo #3"]);
    }

    #[test]
    fn test_names_are_unique() {
        let mut host = MockHost::new();
        for i in 0..20 {
            let name = if i % 3 == 0 { "Same" } else { "Other" };
            host = host.with_endpoint(Direction::Playback, name, format!("{{{i}}}"));
        }
        host = host
            .with_unnamed_endpoint(Direction::Playback)
            .with_unnamed_endpoint(Direction::Playback);

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Playback).unwrap();
        let unique: HashSet<&str> = dir.names().collect();
        assert_eq!(unique.len(), dir.len());
        assert_eq!(dir.len(), 22);
    }

    #[test]
    fn test_property_failures_use_sentinels() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Capture, "Mic", "{mic}")
            .with_unnamed_endpoint(Direction::Capture)
            .with_unnamed_endpoint(Direction::Capture);

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Capture).unwrap();
        let endpoints = dir.endpoints();
        assert_eq!(endpoints[1].name, UNKNOWN_NAME);
        assert_eq!(endpoints[1].guid, UNKNOWN_GUID);
        assert_eq!(endpoints[2].name, "Unknown Device Name #2");
    }

    #[test]
    fn test_enumeration_failure() {
        let mut host = MockHost::new().with_endpoint(Direction::Playback, "A", "{a}");
        host.fail_enumeration(true);

        let result = DeviceDirectory::enumerate(&mut host, Direction::Playback);
        assert!(matches!(
            result,
            Err(StreamDeviceError::Enumeration {
                direction: Direction::Playback,
                ..
            })
        ));
    }

    #[test]
    fn test_select_order() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Playback, "Alpha", "Beta")
            .with_endpoint(Direction::Playback, "Beta", "{b}");

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Playback).unwrap();
        // Name match wins over the first endpoint's GUID
        assert_eq!(dir.select("Beta").unwrap().guid, "{b}");
        assert_eq!(dir.select("{b}").unwrap().name, "Beta");

        let id = dir.endpoints()[0].id.clone();
        assert_eq!(dir.select(id.as_str()).unwrap().name, "Alpha");
        assert!(dir.select("Gamma").is_none());
    }

    #[test]
    fn test_name_list() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Playback, "A", "{a}")
            .with_endpoint(Direction::Playback, "B", "{b}");

        let dir = DeviceDirectory::enumerate(&mut host, Direction::Playback).unwrap();
        assert_eq!(dir.name_list(), "A\0B\0\0");
        assert_eq!(DeviceDirectory::empty(Direction::Capture).name_list(), "\0\0");
    }
}
