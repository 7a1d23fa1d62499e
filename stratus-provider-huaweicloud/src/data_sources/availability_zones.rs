//! availability_zones data source - Names of the region's compute zones

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::DataSourceHandler;
use crate::client::CloudClient;

pub struct AvailabilityZones;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZoneList {
    #[serde(default)]
    availability_zone_info: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Zone {
    zone_name: String,
    zone_state: ZoneState,
}

#[derive(Debug, Deserialize)]
struct ZoneState {
    available: bool,
}

/// Sorted names of the zones whose availability matches `available`
fn zone_names(list: ZoneList, available: bool) -> Vec<String> {
    let mut names: Vec<String> = list
        .availability_zone_info
        .into_iter()
        .filter(|z| z.zone_state.available == available)
        .map(|z| z.zone_name)
        .collect();
    names.sort();
    names
}

impl ResourceType for AvailabilityZones {
    fn name(&self) -> &'static str {
        "availability_zones"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("availability_zones")
            .attribute(
                AttributeSchema::new("state", types::string_enum(&["available", "unavailable"]))
                    .with_default("available"),
            )
            .attribute(AttributeSchema::new("names", types::string_list()).computed())
            .attribute(AttributeSchema::new("region", AttributeType::String).computed())
    }
}

#[async_trait]
impl DataSourceHandler for AvailabilityZones {
    async fn read(&self, client: &CloudClient, query: &Resource) -> ProviderResult<State> {
        let state = query.get_str("state").unwrap_or("available");
        let body = client
            .service("ecs")
            .get("/v2.1/{project_id}/os-availability-zone")
            .await
            .map_err(|e| ProviderError::from(e).for_resource(query.id.clone()))?;
        let list: ZoneList = serde_json::from_value(body).map_err(|e| {
            ProviderError::new(format!("unexpected availability zone listing: {}", e))
                .for_resource(query.id.clone())
        })?;

        let region = client.config().region.clone();
        let mut attributes = HashMap::new();
        attributes.insert("state".to_string(), Value::from(state));
        attributes.insert(
            "names".to_string(),
            Value::string_list(zone_names(list, state == "available")),
        );
        attributes.insert("region".to_string(), Value::from(region.as_str()));

        Ok(State::existing(query.id.clone(), attributes).with_identifier(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> ZoneList {
        serde_json::from_value(json!({"availabilityZoneInfo": [
            {"zoneName": "cn-north-4c", "zoneState": {"available": true}},
            {"zoneName": "cn-north-4a", "zoneState": {"available": true}},
            {"zoneName": "cn-north-4b", "zoneState": {"available": false}},
            {"zoneName": "cn-north-4g", "zoneState": {"available": true}, "hosts": null}
        ]}))
        .unwrap()
    }

    #[test]
    fn names_are_filtered_and_sorted() {
        assert_eq!(
            zone_names(listing(), true),
            vec!["cn-north-4a", "cn-north-4c", "cn-north-4g"]
        );
        assert_eq!(zone_names(listing(), false), vec!["cn-north-4b"]);
    }

    #[test]
    fn empty_listing_has_no_zones() {
        let list: ZoneList = serde_json::from_value(json!({})).unwrap();
        assert!(zone_names(list, true).is_empty());
    }
}
