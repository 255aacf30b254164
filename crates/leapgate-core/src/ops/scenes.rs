//! Scene listing and activation via virtual buttons.

use leapgate_broker::CorrelatedClient;
use tracing::{debug, info};

use crate::error::Error;
use crate::model::{VirtualButton, VirtualButtonListResponse};
use crate::ops::commands::press_and_release_body;

/// List every virtual button on the bridge.
pub async fn get_scenes(client: &CorrelatedClient) -> Result<Vec<VirtualButton>, Error> {
    let response: VirtualButtonListResponse = client.read("/virtualbutton").await?;
    Ok(response.virtual_buttons)
}

/// Activate a scene by its numeric virtual-button id.
pub async fn activate_scene(client: &CorrelatedClient, scene: &str) -> Result<(), Error> {
    if scene.is_empty() || !scene.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_command(format!("invalid scene: {scene:?}")));
    }
    info!(scene, "activating scene");
    client
        .create(
            &format!("/virtualbutton/{scene}/commandprocessor"),
            press_and_release_body(),
        )
        .await?;
    Ok(())
}

/// Activate the programmed scene whose name matches `name`
/// case-insensitively. Returns whether a matching scene was found; an
/// empty or unknown name is not an error.
pub async fn activate_scene_by_name(
    client: &CorrelatedClient,
    name: &str,
) -> Result<bool, Error> {
    if name.is_empty() {
        return Ok(false);
    }

    let scenes = get_scenes(client).await?;
    let wanted = name.to_lowercase();
    let Some(scene) = scenes
        .iter()
        .find(|scene| scene.is_programmed && scene.name.to_lowercase() == wanted)
    else {
        debug!(name, "no programmed scene with that name");
        return Ok(false);
    };

    info!(name, href = scene.href, "activating scene by name");
    client
        .create(
            &format!("{}/commandprocessor", scene.href),
            press_and_release_body(),
        )
        .await?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use leapgate_broker::testing::{FakeLink, response_to};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn fixture() -> (Arc<FakeLink>, CorrelatedClient) {
        let link = FakeLink::new();
        link.respond_with(|request| {
            let body = match request.header.url.as_str() {
                "/virtualbutton" => json!({
                    "VirtualButtons": [
                        {
                            "href": "/virtualbutton/1",
                            "Name": "Movie Night",
                            "IsProgrammed": true,
                            "ButtonNumber": 1,
                        },
                        {
                            "href": "/virtualbutton/2",
                            "Name": "Unused",
                            "IsProgrammed": false,
                            "ButtonNumber": 2,
                        },
                    ]
                }),
                _ => json!({}),
            };
            Some(response_to(request, "ReadResponse", body))
        });
        let client =
            CorrelatedClient::new(Arc::clone(&link) as Arc<dyn leapgate_broker::BrokerLink>);
        (link, client)
    }

    #[tokio::test]
    async fn lists_virtual_buttons() {
        let (_link, client) = fixture();
        let scenes = get_scenes(&client).await.unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].name, "Movie Night");
        assert!(scenes[0].is_programmed);
    }

    #[tokio::test]
    async fn activates_by_name_case_insensitively() {
        let (link, client) = fixture();
        let found = activate_scene_by_name(&client, "movie night").await.unwrap();
        assert!(found);
        assert_eq!(
            link.sent_urls().last().unwrap(),
            "/virtualbutton/1/commandprocessor"
        );
    }

    #[tokio::test]
    async fn unprogrammed_scenes_are_never_matched() {
        let (link, client) = fixture();
        let found = activate_scene_by_name(&client, "Unused").await.unwrap();
        assert!(!found);
        // Only the listing itself went out.
        assert_eq!(link.sent_urls(), vec!["/virtualbutton"]);
    }

    #[tokio::test]
    async fn empty_name_short_circuits_without_io() {
        let (link, client) = fixture();
        let found = activate_scene_by_name(&client, "").await.unwrap();
        assert!(!found);
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn rejects_non_numeric_scene_id() {
        let (link, client) = fixture();
        let error = activate_scene(&client, "nine").await.unwrap_err();
        assert!(error.is_bad_request());
        assert!(link.sent().is_empty());
    }
}
