//! Session client behaviour against the simulated jukebox.

mod common;

use common::{param, track, FakeJukebox};
use rumba_core::session::{Change, SessionClient, SessionSettings};
use rumba_core::EventBus;
use rumba_proto::{Event, SharedState, Track};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

struct Harness {
    fake: Arc<FakeJukebox>,
    state: Arc<Mutex<SharedState>>,
    bus: Arc<EventBus>,
    client: SessionClient,
}

fn harness(fake: Arc<FakeJukebox>, settings: SessionSettings) -> Harness {
    let state = Arc::new(Mutex::new(SharedState::default()));
    let bus = Arc::new(EventBus::new());
    let client = SessionClient::new(
        fake.clone(),
        state.clone(),
        bus.clone(),
        TaskTracker::new(),
        settings,
    );
    Harness {
        fake,
        state,
        bus,
        client,
    }
}

fn abc() -> Vec<Track> {
    vec![track("A", "1", "x"), track("B", "2", "y"), track("C", "3", "z")]
}

async fn synced(tracks: Vec<Track>, index: i64, playing: bool, position: i64) -> Harness {
    let h = harness(
        FakeJukebox::with_playlist(tracks, index, playing, position),
        SessionSettings::default(),
    );
    h.client.get_status().await.unwrap();
    h.fake.clear_requests();
    h
}

async fn mirror_index(h: &Harness) -> Option<usize> {
    h.state.lock().await.playback.current_index
}

// =============================================================================
// Diffing
// =============================================================================

mod diffing {
    use super::*;

    #[tokio::test]
    async fn test_first_status_replaces_playlist() {
        let h = harness(
            FakeJukebox::with_playlist(abc(), 1, true, 3),
            SessionSettings::default(),
        );
        let change = h.client.get_status().await.unwrap();
        assert_eq!(change, Change::PlaylistReplaced);
        assert_eq!(h.fake.calls(), ["jukeboxControl:status", "jukeboxControl:get"]);

        let st = h.state.lock().await;
        assert_eq!(st.playback.playlist.len(), 3);
        assert_eq!(st.playback.current_index, Some(1));
        assert_eq!(st.playback.playlist_version, 1);
        assert!(st.playback.playing);
    }

    #[tokio::test]
    async fn test_identical_stamp_changes_nothing() {
        let h = synced(abc(), 1, true, 3).await;
        assert_eq!(h.client.get_status().await.unwrap(), Change::None);
        assert_eq!(h.fake.calls(), ["jukeboxControl:status"]);
    }

    #[tokio::test]
    async fn test_position_then_play_state() {
        let h = synced(abc(), 1, true, 3).await;
        h.fake.server.lock().unwrap().position = 4;
        assert_eq!(h.client.get_status().await.unwrap(), Change::Position);

        {
            let mut s = h.fake.server.lock().unwrap();
            s.position = 5;
            s.playing = false;
        }
        // the later field wins
        assert_eq!(h.client.get_status().await.unwrap(), Change::PlayState);
    }

    #[tokio::test]
    async fn test_stale_playlist_is_ignored() {
        let h = synced(abc(), 0, false, 0).await;
        {
            let mut s = h.fake.server.lock().unwrap();
            s.playlist = vec![track("D", "4", "w")];
            s.last_mod = 5;
            s.stale_get_stamp = Some(1);
        }
        assert_eq!(h.client.get_status().await.unwrap(), Change::None);
        let st = h.state.lock().await;
        assert_eq!(st.playback.playlist.len(), 3);
        assert_eq!(st.playback.playlist_version, 1);
    }

    #[tokio::test]
    async fn test_newer_playlist_replaces_and_bumps_version() {
        let h = synced(abc(), 0, false, 0).await;
        h.fake.load(vec![track("D", "4", "w")], 0, false, 0);
        assert_eq!(h.client.get_status().await.unwrap(), Change::PlaylistReplaced);
        let st = h.state.lock().await;
        assert_eq!(st.playback.playlist[0].id, "D");
        assert_eq!(st.playback.playlist_version, 2);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_normalised() {
        let h = synced(abc(), 0, false, 0).await;
        h.fake.server.lock().unwrap().index = 7;
        assert_eq!(h.client.get_status().await.unwrap(), Change::Track);
        assert_eq!(mirror_index(&h).await, None);
    }
}

// =============================================================================
// Navigation
// =============================================================================

mod navigation {
    use super::*;

    #[tokio::test]
    async fn test_prev_early_in_track_goes_back() {
        let h = synced(abc(), 1, true, 3).await;
        assert_eq!(h.client.prev_track().await.unwrap(), Change::Track);
        assert_eq!(h.fake.calls(), ["jukeboxControl:skip"]);
        assert_eq!(param(&h.fake.requests()[0].1, "index").as_deref(), Some("0"));
        assert_eq!(mirror_index(&h).await, Some(0));
    }

    #[tokio::test]
    async fn test_prev_late_in_track_restarts() {
        let h = synced(abc(), 1, true, 42).await;
        h.client.prev_track().await.unwrap();
        assert_eq!(param(&h.fake.requests()[0].1, "index").as_deref(), Some("1"));
        assert_eq!(mirror_index(&h).await, Some(1));
    }

    #[tokio::test]
    async fn test_prev_on_first_track_restarts() {
        let h = synced(abc(), 0, true, 2).await;
        h.client.prev_track().await.unwrap();
        assert_eq!(param(&h.fake.requests()[0].1, "index").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_skip_while_paused_is_followed_by_stop() {
        let h = synced(abc(), 1, false, 0).await;
        h.client.prev_track().await.unwrap();
        assert_eq!(h.fake.calls(), ["jukeboxControl:skip", "jukeboxControl:stop"]);
        assert!(!h.state.lock().await.playback.playing);

        h.fake.clear_requests();
        h.client.next_track().await.unwrap();
        assert_eq!(h.fake.calls(), ["jukeboxControl:skip", "jukeboxControl:stop"]);
        assert!(!h.fake.server.lock().unwrap().playing);
    }

    #[tokio::test]
    async fn test_next_wraps_at_end() {
        let h = synced(abc(), 2, true, 0).await;
        h.client.next_track().await.unwrap();
        assert_eq!(param(&h.fake.requests()[0].1, "index").as_deref(), Some("0"));
        assert_eq!(mirror_index(&h).await, Some(0));
    }

    #[tokio::test]
    async fn test_skip_beyond_playlist_only_fetches_status() {
        let h = synced(abc(), 0, true, 0).await;
        assert_eq!(h.client.skip(9, 0).await.unwrap(), Change::None);
        assert_eq!(h.fake.calls(), ["jukeboxControl:status"]);
    }

    #[tokio::test]
    async fn test_index_stays_in_bounds() {
        let h = synced(abc(), 0, true, 0).await;
        for step in 0..30usize {
            match step % 5 {
                0 | 3 => h.client.next_track().await.unwrap(),
                1 => h.client.prev_track().await.unwrap(),
                2 => h.client.skip(step % 4, 12).await.unwrap(),
                _ => h.client.start_stop().await.unwrap(),
            };
            let st = h.state.lock().await;
            let len = st.playback.playlist.len();
            assert!(st.playback.current_index.map_or(true, |i| i < len));
        }
    }
}

// =============================================================================
// Playlist edits
// =============================================================================

mod playlist {
    use super::*;

    #[tokio::test]
    async fn test_set_playlist_with_resume_orders_requests() {
        let h = synced(abc(), 0, true, 0).await;
        h.client
            .set_playlist(vec!["C".into(), "A".into()], Some((1, 30)))
            .await
            .unwrap();
        assert_eq!(
            h.fake.commands(),
            ["jukeboxControl:stop", "jukeboxControl:set", "jukeboxControl:skip"]
        );
        let skip = &h.fake.requests()[2].1;
        assert_eq!(param(skip, "index").as_deref(), Some("1"));
        assert_eq!(param(skip, "offset").as_deref(), Some("30"));

        let st = h.state.lock().await;
        assert_eq!(st.playback.playlist[1].id, "A");
        assert_eq!(st.playback.current_index, Some(1));
    }

    #[tokio::test]
    async fn test_insert_random_starts_playback_when_stopped() {
        let h = synced(abc(), 0, false, 0).await;
        h.fake.server.lock().unwrap().random = vec![track("R1", "9", "q"), track("R2", "9", "q")];
        let change = h.client.insert_random().await.unwrap();
        assert_eq!(change, Change::PlaylistReplaced);
        assert_eq!(
            h.fake.commands(),
            ["getRandomSongs", "jukeboxControl:set", "jukeboxControl:skip"]
        );
        assert_eq!(h.fake.playlist_ids(), ["R1", "R2"]);
        assert_eq!(param(&h.fake.requests()[0].1, "size").as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_insert_random_passes_excluded_folders() {
        let fake = FakeJukebox::with_playlist(abc(), 0, true, 0);
        fake.server.lock().unwrap().random = vec![track("R1", "9", "q")];
        let settings = SessionSettings {
            exclude_folders: vec![3, 8],
            ..SessionSettings::default()
        };
        let h = harness(fake, settings);
        h.client.get_status().await.unwrap();
        h.client.insert_random().await.unwrap();

        let (_, p) = h
            .fake
            .requests()
            .into_iter()
            .find(|(e, _)| e == "getRandomSongs")
            .unwrap();
        let excluded: Vec<_> = p
            .iter()
            .filter(|(k, _)| k == "excludeFolderIds")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(excluded, ["3", "8"]);
        // already playing: no extra skip
        assert!(!h.fake.commands().contains(&"jukeboxControl:skip".to_string()));
    }

    #[tokio::test]
    async fn test_insert_similar_adds_artist_tracks_after_current() {
        let tracks = vec![track("A1", "7", "x"), track("A2", "7", "x"), track("B", "8", "y")];
        let h = synced(tracks, 1, true, 0).await;
        h.fake.server.lock().unwrap().similar = vec![track("S1", "5", "x"), track("S2", "6", "x")];

        h.client.insert_similar().await.unwrap();
        assert_eq!(h.fake.commands(), ["getSimilarSongs", "jukeboxControl:set"]);
        let p = &h.fake.requests()[0].1;
        assert_eq!(param(p, "id").as_deref(), Some("ar-x"));
        assert_eq!(param(p, "count").as_deref(), Some("20"));
        assert_eq!(h.fake.playlist_ids(), ["A1", "A2", "S1", "S2", "B"]);
    }

    #[tokio::test]
    async fn test_insert_similar_last_track_of_album_uses_artist_branch() {
        let tracks = vec![track("A1", "7", "x"), track("A2", "7", "x")];
        let h = synced(tracks, 1, true, 0).await;
        h.fake.server.lock().unwrap().similar = vec![track("S1", "5", "x")];

        h.client.insert_similar().await.unwrap();
        assert_eq!(h.fake.playlist_ids(), ["A1", "A2", "S1"]);
    }

    #[tokio::test]
    async fn test_insert_similar_replaces_lone_track_with_album() {
        let h = synced(abc(), 1, true, 0).await;
        let album = vec![track("B1", "2", "y"), track("B", "2", "y"), track("B3", "2", "y")];
        h.fake.add_to_catalog(&album);
        h.fake
            .server
            .lock()
            .unwrap()
            .directories
            .insert("dir-2".into(), album);

        h.client.insert_similar().await.unwrap();
        assert_eq!(h.fake.commands(), ["getMusicDirectory", "jukeboxControl:set"]);
        assert_eq!(h.fake.playlist_ids(), ["A", "B1", "B", "B3", "C"]);
    }

    #[tokio::test]
    async fn test_insert_similar_without_candidates_is_noop() {
        let tracks = vec![track("A1", "7", "x"), track("A2", "7", "x")];
        let h = synced(tracks, 0, true, 0).await;
        assert_eq!(h.client.insert_similar().await.unwrap(), Change::None);
        assert_eq!(h.fake.commands(), ["getSimilarSongs"]);
        assert_eq!(h.fake.playlist_ids(), ["A1", "A2"]);
    }

    #[tokio::test]
    async fn test_star_marks_current_track() {
        let h = synced(abc(), 2, true, 0).await;
        assert_eq!(h.client.star(true).await.unwrap(), Change::Track);
        assert_eq!(h.fake.calls(), ["star"]);
        assert!(h.state.lock().await.playback.playlist[2].starred);

        h.client.star(false).await.unwrap();
        assert!(!h.state.lock().await.playback.playlist[2].starred);
    }

    #[tokio::test]
    async fn test_save_and_restore_session() {
        let h = synced(abc(), 2, true, 77).await;
        h.client.save_state().await;
        let saved = h.client.saved_state().unwrap();
        assert_eq!(saved.ids, ["A", "B", "C"]);
        assert_eq!(saved.index, Some(2));
        assert_eq!(saved.position, 77);

        h.fake.load(vec![track("Z", "0", "0")], 0, false, 0);
        h.client.restore_state().await.unwrap();
        assert_eq!(h.fake.playlist_ids(), ["A", "B", "C"]);
        assert!(h.client.saved_state().is_none());
        assert_eq!(mirror_index(&h).await, Some(2));
        assert_eq!(h.state.lock().await.playback.position_secs, 77);
    }

    #[tokio::test]
    async fn test_nothing_saved_for_empty_playlist() {
        let h = synced(Vec::new(), -1, false, 0).await;
        h.client.save_state().await;
        assert!(h.client.saved_state().is_none());
        assert_eq!(h.client.restore_state().await.unwrap(), Change::None);
        assert!(h.fake.calls().is_empty());
    }
}

// =============================================================================
// Cover art
// =============================================================================

mod covers {
    use super::*;
    use common::eventually;

    #[tokio::test]
    async fn test_no_cover_without_resolution() {
        let h = synced(abc(), 0, true, 0).await;
        h.fake.load(abc(), 1, true, 0);
        h.client.get_status().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(!h.fake.calls().iter().any(|c| c.starts_with("getCover")));
    }

    #[tokio::test]
    async fn test_remote_cover_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SessionSettings {
            cache_dir: dir.path().to_path_buf(),
            ..SessionSettings::default()
        };
        let h = harness(FakeJukebox::with_playlist(abc(), 1, true, 0), settings);
        let (_, mut rx) = h.bus.subscribe_channel("test");
        h.client.set_display_resolution("320");
        h.client.get_status().await.unwrap();

        let expected = dir.path().join("cov-B-screen320.jpg");
        assert!(eventually(|| expected.exists()).await);

        let notification = rx.recv().await.unwrap();
        match &notification.event {
            Event::TrackChanged { track: Some(t), .. } => {
                assert_eq!(t.id, "B");
                assert_eq!(t.cover_path.as_deref(), Some(expected.as_path()));
            }
            other => panic!("unexpected event {:?}", other),
        }
        let st = h.state.lock().await;
        assert!(st.playback.playlist[1].cover_requested);
    }

    #[tokio::test]
    async fn test_local_server_returns_path() {
        let h = harness(
            FakeJukebox::local(),
            SessionSettings::default(),
        );
        h.fake.load(abc(), 0, false, 0);
        let (_, mut rx) = h.bus.subscribe_channel("test");
        h.client.set_display_resolution("480");
        h.client.get_status().await.unwrap();

        let n = rx.recv().await.unwrap();
        let Event::TrackChanged { track: Some(t), .. } = &n.event else {
            panic!("unexpected event {:?}", n.event);
        };
        assert_eq!(
            t.cover_path.as_deref(),
            Some(std::path::Path::new("/srv/covers/cov-A-480.jpg"))
        );
        // requested once only
        h.client.get_status().await.unwrap();
        let fetches = h.fake.calls().iter().filter(|c| *c == "getCoverScreen").count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn test_cover_for_replaced_playlist_is_dropped() {
        let h = harness(FakeJukebox::local(), SessionSettings::default());
        h.fake.load(abc(), 1, true, 0);
        let (_, mut rx) = h.bus.subscribe_channel("test");
        h.client.set_display_resolution("320");

        h.fake.hold_endpoint("getCoverScreen");
        h.client.get_status().await.unwrap();
        h.fake.load(vec![track("D", "4", "w"), track("E", "5", "w")], 1, true, 0);
        h.client.get_status().await.unwrap();
        h.fake.release();

        let n = rx.recv().await.unwrap();
        let Event::TrackChanged { track: Some(t), .. } = &n.event else {
            panic!("unexpected event {:?}", n.event);
        };
        assert_eq!(t.id, "E");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        let st = h.state.lock().await;
        assert_eq!(
            st.playback.playlist[1].cover_path.as_deref(),
            Some(std::path::Path::new("/srv/covers/cov-E-320.jpg"))
        );
    }
}
