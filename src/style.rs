//! Style-template renderer: builds the Mapbox style JSON consumed by map
//! clients, pointing them at the tile endpoint under the configured public
//! URL. Grounded on `mapstyleservice.go`'s `defaultMapStyle`.

use serde_json::{json, Value};

const VECTOR_SOURCE_NAME: &str = "osmintile";
const INDOOR_LAYER_NAME: &str = "osm-indoor-buildings";

/// Indoor level baked into the tile URL template; the style itself is not
/// parameterised by level in the upstream design, so level 0 (ground
/// floor) is the one the default style points at.
const DEFAULT_STYLE_LEVEL: i64 = 0;

/// `GetMapStyle`: a Mapbox GL style document (version 8) with a single
/// vector source and a single fill layer over it.
pub fn default_map_style(public_url: &str) -> Value {
    let tiles_url = format!("{public_url}/tiles/{DEFAULT_STYLE_LEVEL}/{{z}}/{{x}}/{{y}}");

    json!({
        "version": 8,
        "sources": {
            VECTOR_SOURCE_NAME: {
                "type": "vector",
                "tiles": [tiles_url],
            },
        },
        "layers": [
            {
                "id": INDOOR_LAYER_NAME,
                "type": "fill",
                "source": VECTOR_SOURCE_NAME,
                "source-layer": INDOOR_LAYER_NAME,
                "paint": {
                    "fill-color": "#FF0000",
                },
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_points_clients_at_the_configured_public_url() {
        let style = default_map_style("http://example.test");
        assert_eq!(style["version"], 8);
        assert_eq!(
            style["sources"]["osmintile"]["tiles"][0],
            "http://example.test/tiles/0/{z}/{x}/{y}"
        );
        assert_eq!(style["layers"][0]["source-layer"], "osm-indoor-buildings");
    }
}
