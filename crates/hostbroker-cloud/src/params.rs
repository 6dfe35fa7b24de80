//! Builder for the flat, dot/index-addressed key-value pairs the AWS Query
//! API expects (`InstanceIds.1=i-1&InstanceIds.2=i-2`,
//! `LaunchTemplateConfigs.1.Overrides.1.SubnetId=subnet-a`).

/// Accumulates `(String, String)` pairs and exposes them as `(&str, &str)`
/// for [`crate::AwsClient::ec2_query`]/`autoscaling_query`.
#[derive(Debug, Default, Clone)]
pub struct ParamBuilder {
    pairs: Vec<(String, String)>,
}

impl ParamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn set_opt(&mut self, key: impl Into<String>, value: Option<impl Into<String>>) -> &mut Self {
        if let Some(v) = value {
            self.set(key, v);
        }
        self
    }

    /// `prefix.1 = items[0]`, `prefix.2 = items[1]`, ... (1-indexed, AWS
    /// convention for flat lists of scalars).
    pub fn list(&mut self, prefix: &str, items: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        for (i, item) in items.into_iter().enumerate() {
            self.set(format!("{}.{}", prefix, i + 1), item);
        }
        self
    }

    pub fn as_pairs(&self) -> Vec<(&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_one_indexed() {
        let mut b = ParamBuilder::new();
        b.list("InstanceId", ["i-1", "i-2"]);
        assert_eq!(
            b.as_pairs(),
            vec![("InstanceId.1", "i-1"), ("InstanceId.2", "i-2")]
        );
    }

    #[test]
    fn set_opt_skips_none() {
        let mut b = ParamBuilder::new();
        b.set_opt("MaxPrice", None::<String>);
        b.set_opt("MinCount", Some("1"));
        assert_eq!(b.as_pairs(), vec![("MinCount", "1")]);
    }
}
