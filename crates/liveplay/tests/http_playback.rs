mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use common::{RecordingSink, TestServer, aac_segment};
use liveplay_engine::test_support::{FakeSurface, RecordingListener};
use liveplay_engine::{LiveSession, SessionConfig, SessionParts};

/// Manifest with one relative and one absolute segment URI.
fn manifest(base_url: &str) -> String {
    format!(
        "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:7\n\
         #EXTINF:1.0,\nseg0.ts\n\
         #EXTINF:1.0,\n{base_url}/cdn/seg1.ts\n\
         #EXT-X-ENDLIST\n"
    )
}

#[tokio::test]
async fn test_plays_ended_playlist_over_http() {
    let server = TestServer::start(|base_url| {
        let text = manifest(base_url);
        Router::new()
            .route(
                "/live/index.m3u8",
                get(move || {
                    let text = text.clone();
                    async move { text }
                }),
            )
            .route("/live/seg0.ts", get(|| async { aac_segment(90_000, 10) }))
            .route("/cdn/seg1.ts", get(|| async { aac_segment(109_200, 10) }))
    })
    .await;

    let sink = RecordingSink::default();
    let surface = FakeSurface::default();
    let listener = Arc::new(RecordingListener::default());
    let parts = SessionParts::new(Box::new(sink.clone()), Box::new(surface.clone()));
    let mut session = LiveSession::new(
        &server.url("/live/index.m3u8"),
        parts,
        listener.clone(),
        SessionConfig::default(),
    )
    .unwrap();

    session.start().unwrap();
    tokio::time::timeout(Duration::from_secs(10), session.wait())
        .await
        .expect("session should finish after the playlist ends")
        .unwrap();

    let appended = sink.appended();
    assert_eq!(appended.len(), 2);
    for fragment in &appended {
        assert_eq!(&fragment[4..8], b"ftyp");
        let (init, media) = mp4_split(fragment);
        assert!(!init.is_empty());
        assert_eq!(&media[4..8], b"moof");
    }
    assert!(sink.log().ended);
    assert_eq!(surface.0.lock().unwrap().play_calls, 1);
    assert_eq!(listener.last_stats().unwrap().downloaded_count, 2);
    assert_eq!(listener.error_count(), 0);
}

/// Split a fragment at its first `moof` box.
fn mp4_split(data: &[u8]) -> (&[u8], &[u8]) {
    let mut offset = 0;
    while offset + 8 <= data.len() {
        let size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        if &data[offset + 4..offset + 8] == b"moof" {
            return data.split_at(offset);
        }
        offset += size.max(8);
    }
    (data, &[])
}
