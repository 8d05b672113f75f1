use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;

const ENV_HA_URL: &str = "MINDHOME_HA_URL";
const ENV_HA_TOKEN: &str = "MINDHOME_HA_TOKEN";

/// Thin client for the Home Assistant REST API. HA is the opaque source of
/// truth and actuator; nothing of its protocol is modeled beyond these two
/// calls.
#[derive(Debug, Clone)]
pub struct HaClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl HaClient {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var(ENV_HA_URL)
                .unwrap_or_else(|_| "http://supervisor/core".to_string()),
            token: std::env::var(ENV_HA_TOKEN).unwrap_or_default(),
        }
    }

    pub async fn get_state(&self, entity_id: &str) -> Result<HaState> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| anyhow!("home assistant unreachable: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "home assistant returned {} for {}",
                response.status(),
                entity_id
            ));
        }

        let state: HaState = response
            .json()
            .await
            .map_err(|e| anyhow!("invalid state payload: {}", e))?;
        Ok(state)
    }

    /// Calls "<domain>.<service>", e.g. "light.turn_on", on one entity.
    pub async fn call_service(
        &self,
        service: &str,
        entity_id: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let (domain, service_name) = service
            .split_once('.')
            .ok_or_else(|| anyhow!("malformed service '{}', expected domain.service", service))?;
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service_name);

        let mut body = data.clone();
        body.insert(
            "entity_id".to_string(),
            serde_json::Value::String(entity_id.to_string()),
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("home assistant unreachable: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "service call {} on {} failed with {}",
                service,
                entity_id,
                response.status()
            ));
        }
        Ok(())
    }

    /// Pushes a message through a notify service, e.g. "mobile_app_phone"
    /// or plain "notify" for the broadcast target.
    pub async fn notify(&self, channel: &str, title: &str, message: &str) -> Result<()> {
        let url = format!("{}/api/services/notify/{}", self.base_url, channel);
        let body = serde_json::json!({ "title": title, "message": message });
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("home assistant unreachable: {}", e))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "notify via {} failed with {}",
                channel,
                response.status()
            ));
        }
        Ok(())
    }

    /// Service that moves an entity to a desired plain state. Used when
    /// executing patterns and activating scenes.
    pub fn service_for_state(entity_id: &str, target_state: &str) -> String {
        let domain = crate::models::entity_domain(entity_id);
        match (domain, target_state) {
            (_, "on") => format!("{}.turn_on", domain),
            (_, "off") => format!("{}.turn_off", domain),
            ("cover", "open") => "cover.open_cover".to_string(),
            ("cover", "closed") => "cover.close_cover".to_string(),
            ("lock", "locked") => "lock.lock".to_string(),
            ("lock", "unlocked") => "lock.unlock".to_string(),
            _ => format!("{}.turn_on", domain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_mapping_covers_common_domains() {
        assert_eq!(HaClient::service_for_state("light.x", "on"), "light.turn_on");
        assert_eq!(HaClient::service_for_state("switch.x", "off"), "switch.turn_off");
        assert_eq!(HaClient::service_for_state("cover.x", "open"), "cover.open_cover");
        assert_eq!(HaClient::service_for_state("lock.x", "locked"), "lock.lock");
    }
}
