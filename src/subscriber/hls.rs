use {
    crate::broadcast::hls::{build_media_playlist, HlsBroadcaster},
    hyper::{Body, Response, StatusCode},
};

/// One HLS viewer. Stateless between requests beyond its registration
/// with the broadcaster; playlist and segment responses are plain reads
/// of the broadcaster's stream state.
pub struct HlsSubscriber {
    pub key: String,
    pub client_id: String,
}

impl HlsSubscriber {
    pub fn new(key: &str, client_id: &str) -> Self {
        Self {
            key: key.to_owned(),
            client_id: client_id.to_owned(),
        }
    }

    /// `…/index.m3u8`: synthesize the local sliding-window playlist.
    pub fn handle_index(&self, broadcaster: &HlsBroadcaster) -> Response<Body> {
        let snapshot = broadcaster.state().snapshot();
        let playlist = build_media_playlist(&self.key, &self.client_id, &snapshot);
        Response::builder()
            .header("Content-Type", "application/vnd.apple.mpegurl")
            .header("Cache-Control", "no-store")
            .body(Body::from(playlist))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }

    /// `…/<seq>.<ext>`: serve cached segment bytes, 404 on miss.
    pub fn handle_segment(&self, broadcaster: &HlsBroadcaster, filename: &str) -> Response<Body> {
        match broadcaster.state().find_segment(filename) {
            Some(seg) => Response::builder()
                .header("Content-Type", content_type_for(filename))
                .header("Cache-Control", "public, max-age=60")
                .body(Body::from(seg.data))
                .unwrap_or_else(|_| Response::new(Body::empty())),
            None => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::from("segment not found"))
                .unwrap_or_else(|_| Response::new(Body::empty())),
        }
    }
}

fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".ts") {
        "video/mp2t"
    } else if filename.ends_with(".m4s") || filename.ends_with(".mp4") {
        "video/mp4"
    } else {
        "application/octet-stream"
    }
}
