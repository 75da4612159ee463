//! Cache keys and pub/sub channel names

use common::ConfigId;

/// Latest LocalAggregate of a pair
pub fn local_aggregate_key(config_id: ConfigId) -> String {
    format!("localAggregate:{}", config_id)
}

/// Latest GlobalAggregate of a pair
pub fn global_aggregate_key(config_id: ConfigId) -> String {
    format!("globalAggregate:{}", config_id)
}

pub fn proof_key(config_id: ConfigId, round: i64) -> String {
    format!("proof:{}|round:{}", config_id, round)
}

/// Channel carrying SubmissionData of one pair
pub fn submission_stream_key(name: &str) -> String {
    format!("submissionDataStream:{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(local_aggregate_key(3), "localAggregate:3");
        assert_eq!(global_aggregate_key(3), "globalAggregate:3");
        assert_eq!(proof_key(3, 12), "proof:3|round:12");
        assert_eq!(submission_stream_key("BTC-USD"), "submissionDataStream:BTC-USD");
    }
}
