//! Aggregate counters derived from the virtual server list.
use crate::query::split_token;

/// Totals accumulated over one serverlist response.  The serverlist itself
/// never reaches the XML document; only these counters do.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct VirtualServerMetrics {
    pub total_counter: u64,
    pub online_counter: u64,
    pub offline_counter: u64,
    pub clientsonline_counter: u64,
    pub queryclientsonline_counter: u64,
}

impl VirtualServerMetrics {
    /// Tally the counters from a raw serverlist payload.  Counts are taken
    /// on faith: a malformed value contributes 0 rather than failing.
    pub fn from_serverlist(serverlist: &str) -> Self {
        let mut metrics = Self::default();
        for server in serverlist.split('|') {
            for (key, value) in server.split(' ').filter_map(split_token) {
                let value = value.unwrap_or_default();
                match key.as_str() {
                    "id" => metrics.total_counter += 1,
                    "status" if value == "online" => metrics.online_counter += 1,
                    "status" => metrics.offline_counter += 1,
                    "clientsonline" => {
                        metrics.clientsonline_counter += value.parse::<u64>().unwrap_or(0)
                    }
                    "queryclientsonline" => {
                        metrics.queryclientsonline_counter += value.parse::<u64>().unwrap_or(0)
                    }
                    _ => {}
                }
            }
        }
        metrics
    }

    /// Render the counters as a synthetic response record, so they can be
    /// merged into the XML document like any real command's output.
    pub fn as_record(&self) -> String {
        format!(
            "virtualserver_total_counter={} \
             virtualserver_online_counter={} \
             virtualserver_offline_counter={} \
             virtualserver_clientsonline_counter={} \
             virtualserver_queryclientsonline_counter={}",
            self.total_counter,
            self.online_counter,
            self.offline_counter,
            self.clientsonline_counter,
            self.queryclientsonline_counter
        )
    }
}
