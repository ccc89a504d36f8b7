//! Static on-demand price table used for account cost estimates

use crate::models::{normalize_instance_type, InstanceTypeInfo};

/// Billing hours per month used by the estimate
pub const HOURS_PER_MONTH: f64 = 730.0;

struct PriceEntry {
    instance_type: &'static str,
    vcpus: u32,
    memory_mib: u64,
    hourly_usd: f64,
}

const PRICES: &[PriceEntry] = &[
    PriceEntry { instance_type: "t2.micro", vcpus: 1, memory_mib: 1024, hourly_usd: 0.0116 },
    PriceEntry { instance_type: "t2.small", vcpus: 1, memory_mib: 2048, hourly_usd: 0.023 },
    PriceEntry { instance_type: "t2.medium", vcpus: 2, memory_mib: 4096, hourly_usd: 0.0464 },
    PriceEntry { instance_type: "t3.nano", vcpus: 2, memory_mib: 512, hourly_usd: 0.0052 },
    PriceEntry { instance_type: "t3.micro", vcpus: 2, memory_mib: 1024, hourly_usd: 0.0104 },
    PriceEntry { instance_type: "t3.small", vcpus: 2, memory_mib: 2048, hourly_usd: 0.0208 },
    PriceEntry { instance_type: "t3.medium", vcpus: 2, memory_mib: 4096, hourly_usd: 0.0416 },
    PriceEntry { instance_type: "t3.large", vcpus: 2, memory_mib: 8192, hourly_usd: 0.0832 },
    PriceEntry { instance_type: "t3.xlarge", vcpus: 4, memory_mib: 16384, hourly_usd: 0.1664 },
    PriceEntry { instance_type: "m5.large", vcpus: 2, memory_mib: 8192, hourly_usd: 0.096 },
    PriceEntry { instance_type: "m5.xlarge", vcpus: 4, memory_mib: 16384, hourly_usd: 0.192 },
    PriceEntry { instance_type: "m5.2xlarge", vcpus: 8, memory_mib: 32768, hourly_usd: 0.384 },
    PriceEntry { instance_type: "c5.large", vcpus: 2, memory_mib: 4096, hourly_usd: 0.085 },
    PriceEntry { instance_type: "c5.xlarge", vcpus: 4, memory_mib: 8192, hourly_usd: 0.17 },
    PriceEntry { instance_type: "r5.large", vcpus: 2, memory_mib: 16384, hourly_usd: 0.126 },
    PriceEntry { instance_type: "r5.xlarge", vcpus: 4, memory_mib: 32768, hourly_usd: 0.252 },
];

/// Hourly on-demand rate; unknown types cost nothing
pub fn hourly_rate(instance_type: &str) -> f64 {
    let wanted = normalize_instance_type(instance_type);
    PRICES
        .iter()
        .find(|p| p.instance_type == wanted)
        .map(|p| p.hourly_usd)
        .unwrap_or(0.0)
}

pub fn monthly_rate(instance_type: &str) -> f64 {
    hourly_rate(instance_type) * HOURS_PER_MONTH
}

/// Instance types the price table knows about
pub fn known_instance_types() -> Vec<InstanceTypeInfo> {
    PRICES
        .iter()
        .map(|p| InstanceTypeInfo {
            instance_type: p.instance_type.to_string(),
            vcpus: p.vcpus,
            memory_mib: p.memory_mib,
        })
        .collect()
}
