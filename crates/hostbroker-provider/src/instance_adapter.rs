//! EC2 `DescribeInstances` response parsing into a provider-neutral shape.
//!
//! `hostbroker_cloud::xml` only knows how to pull flat/sibling elements out
//! of a document; `DescribeInstances` nests `reservationSet/item/
//! instancesSet/item/tagSet/item` three `item` levels deep, which a
//! string-scanning splitter can't disambiguate. This walks the document
//! once with `quick_xml`'s event reader, tracking the element path as a
//! stack of local names, and buffers one [`DescribedInstance`] per
//! `instancesSet/item` it closes.

use std::collections::HashMap;

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader as XmlReader;

use hostbroker_domain::MachineStatus;

#[derive(Debug, Clone, Default)]
pub struct DescribedInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub state: MachineStatus,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub launch_time: Option<String>,
    pub subnet_id: Option<String>,
    pub vpc_id: Option<String>,
    pub tags: HashMap<String, String>,
}

impl DescribedInstance {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Parse a `DescribeInstancesResponse` body into one record per instance.
pub fn parse_describe_instances(xml: &str) -> Vec<DescribedInstance> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut results = Vec::new();
    let mut current: Option<DescribedInstance> = None;
    let mut current_key: Option<String> = None; // pending tagSet/item/key value
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                path.push(name.clone());
                text_buf.clear();
                if path_ends_with(&path, &["instancesSet", "item"]) {
                    current = Some(DescribedInstance::default());
                }
            }
            Ok(XmlEvent::Text(e)) => {
                if let Ok(s) = e.unescape() {
                    text_buf.push_str(&s);
                }
            }
            Ok(XmlEvent::End(_)) => {
                let name = path.pop().unwrap_or_default();
                if let Some(inst) = current.as_mut() {
                    match name.as_str() {
                        "instanceId" => inst.instance_id = text_buf.clone(),
                        "instanceType" => inst.instance_type = text_buf.clone(),
                        "imageId" => inst.image_id = Some(text_buf.clone()),
                        "privateIpAddress" if path_ends_with(&path, &["instancesSet", "item"]) => {
                            inst.private_ip = Some(text_buf.clone())
                        }
                        "ipAddress" if path_ends_with(&path, &["instancesSet", "item"]) => {
                            inst.public_ip = Some(text_buf.clone())
                        }
                        "launchTime" => inst.launch_time = Some(text_buf.clone()),
                        "subnetId" => inst.subnet_id = Some(text_buf.clone()),
                        "vpcId" => inst.vpc_id = Some(text_buf.clone()),
                        "name" if path_ends_with(&path, &["instanceState"]) => {
                            inst.state = MachineStatus::from_ec2_state(text_buf.trim())
                        }
                        "key" if path_ends_with(&path, &["tagSet", "item"]) => {
                            current_key = Some(text_buf.clone())
                        }
                        "value" if path_ends_with(&path, &["tagSet", "item"]) => {
                            if let Some(key) = current_key.take() {
                                inst.tags.insert(key, text_buf.clone());
                            }
                        }
                        _ => {}
                    }
                }
                if name == "item" && path_ends_with(&path, &["instancesSet"]) {
                    if let Some(inst) = current.take() {
                        results.push(inst);
                    }
                }
                text_buf.clear();
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    results
}

fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    if path.len() < suffix.len() {
        return false;
    }
    path[path.len() - suffix.len()..]
        .iter()
        .zip(suffix.iter())
        .all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    <DescribeInstancesResponse>
      <reservationSet>
        <item>
          <reservationId>r-1</reservationId>
          <instancesSet>
            <item>
              <instanceId>i-0123456789abcdef0</instanceId>
              <imageId>ami-1</imageId>
              <instanceType>m5.large</instanceType>
              <launchTime>2026-01-01T00:00:00.000Z</launchTime>
              <privateIpAddress>10.0.0.5</privateIpAddress>
              <ipAddress>203.0.113.5</ipAddress>
              <subnetId>subnet-1</subnetId>
              <vpcId>vpc-1</vpcId>
              <instanceState><code>16</code><name>running</name></instanceState>
              <tagSet>
                <item><key>aws:ec2:fleet-id</key><value>fleet-abc</value></item>
                <item><key>Name</key><value>worker</value></item>
              </tagSet>
            </item>
            <item>
              <instanceId>i-00ffffffffffffff1</instanceId>
              <imageId>ami-1</imageId>
              <instanceType>m5.large</instanceType>
              <instanceState><code>16</code><name>running</name></instanceState>
            </item>
          </instancesSet>
        </item>
      </reservationSet>
    </DescribeInstancesResponse>
    "#;

    #[test]
    fn parses_two_instances_with_distinct_tags() {
        let instances = parse_describe_instances(SAMPLE);
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].instance_id, "i-0123456789abcdef0");
        assert_eq!(instances[0].tag("aws:ec2:fleet-id"), Some("fleet-abc"));
        assert_eq!(instances[0].public_ip.as_deref(), Some("203.0.113.5"));
        assert_eq!(instances[0].state, MachineStatus::Running);
        assert!(instances[1].tags.is_empty());
    }
}
