use super::{CollectorState, attributes};
use crate::metrics::{MetricHandle, Observer};

pub const HOST_INFO: MetricHandle = MetricHandle::new("tlum_host_info", "info about the host");

/// Identity of the host the agent runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub os: String,
    pub ip: String,
    pub arch: String,
    pub latitude: String,
    pub longitude: String,
    pub hostname: String,
    /// Machine id.
    pub id: String,
}

impl CollectorState for HostInfo {
    fn metrics() -> Vec<MetricHandle> {
        vec![HOST_INFO]
    }

    fn observe(&self, observer: &mut dyn Observer) {
        observer.observe(
            &HOST_INFO,
            1,
            attributes([
                ("os", &self.os),
                ("ip", &self.ip),
                ("arch", &self.arch),
                ("latitude", &self.latitude),
                ("longitude", &self.longitude),
                ("hostname", &self.hostname),
                ("id", &self.id),
            ]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ObservationBuffer;

    #[test]
    fn test_empty_host_still_observed() {
        let mut buffer = ObservationBuffer::new();
        HostInfo::default().observe(&mut buffer);

        assert_eq!(buffer.len(), 1);
        let obs = &buffer.observations()[0];
        assert_eq!(obs.metric, "tlum_host_info");
        assert_eq!(obs.value, 1);
        assert_eq!(obs.attributes.len(), 7);
        assert!(obs.attributes.iter().all(|(_, v)| v.is_empty()));
    }

    #[test]
    fn test_host_attributes() {
        let host = HostInfo {
            os: "linux".into(),
            ip: "10.0.0.4".into(),
            arch: "amd64".into(),
            latitude: "45.07".into(),
            longitude: "7.68".into(),
            hostname: "edge-01".into(),
            id: "abc123".into(),
        };
        let mut buffer = ObservationBuffer::new();
        host.observe(&mut buffer);

        let obs = &buffer.observations()[0];
        assert_eq!(obs.attribute("id"), Some("abc123"));
        assert_eq!(obs.attribute("hostname"), Some("edge-01"));
        assert_eq!(obs.attribute("latitude"), Some("45.07"));
        assert_eq!(obs.attribute("arch"), Some("amd64"));
    }
}
