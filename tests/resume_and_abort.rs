//! Resume cursors, cancellation and the special search phases.

use std::time::{Duration, Instant};

use meshcrack::{CrackOptions, Cracker, ResumeKind};

/// Capture on the well-known public room, message "kiwi: hi".
const PACKET_PUBLIC: &str = "150011dbbbafb5135f8386355d58b2232d46700483";

/// Capture on room "a-b", message "kiwi: dash".
const PACKET_HYPHEN: &str = "1500690feff9e095e4bd0887b025778253d94f8283";

/// Capture on room "able"; "q81eb" collides on hash + tag.
const PACKET_ABLE: &str =
    "15002b77ca26cf0d63aacc998f893262ef923f71033c0cbc2de92b5189d13d45dd39141ae3";

fn cpu_opts() -> CrackOptions {
    CrackOptions {
        force_cpu: true,
        use_timestamp_filter: false,
        ..CrackOptions::default()
    }
}

#[test]
fn test_public_room_is_tried_first() {
    let mut cracker = Cracker::new();
    let result = cracker.crack(PACKET_PUBLIC, &cpu_opts(), None);
    assert!(result.found, "public room should hit: {result:?}");
    assert_eq!(result.room_name.as_deref(), Some("public"));
    assert_eq!(
        result.key.map(hex::encode).as_deref(),
        Some("8b3387e9c5cdea6ac9e5edbaa115cd72")
    );
    assert_eq!(result.message.as_deref(), Some("hi"));
    // Skipping past a public false positive resumes in the dictionary.
    assert_eq!(result.resume_kind, Some(ResumeKind::Dictionary));
    assert_eq!(result.resume_from.as_deref(), Some("public"));
}

#[test]
fn test_public_room_skipped_on_resume() {
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 1,
        start_from: Some("public".into()),
        start_from_kind: ResumeKind::Dictionary,
        ..cpu_opts()
    };
    // With Phase A skipped and no dictionary, only length-1 brute force
    // runs; the packet's room is not length 1.
    let result = cracker.crack(PACKET_PUBLIC, &opts, None);
    assert!(!result.found);
    assert!(result.error.is_none());
}

#[test]
fn test_hyphenated_room_is_enumerable() {
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 3,
        ..cpu_opts()
    };
    let result = cracker.crack(PACKET_HYPHEN, &opts, None);
    assert!(result.found, "expected a-b: {result:?}");
    assert_eq!(result.room_name.as_deref(), Some("a-b"));
    assert_eq!(result.message.as_deref(), Some("dash"));
}

#[test]
fn test_skip_false_positive_workflow() {
    // "p81eb" sits immediately before the collision "q81eb" in enumeration
    // order, so this resume surfaces the collision after a single batch.
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 5,
        use_utf8_filter: false,
        start_from: Some("p81eb".into()),
        start_from_kind: ResumeKind::Bruteforce,
        ..cpu_opts()
    };
    let first = cracker.crack(PACKET_ABLE, &opts, None);
    assert!(first.found);
    assert_eq!(first.room_name.as_deref(), Some("q81eb"));
    assert_eq!(first.resume_from.as_deref(), Some("q81eb"));
}

#[test]
fn test_success_cursor_feeds_back_to_exhaustion() {
    // Crack, then feed the success cursor back in: the found room is
    // skipped, the rest of the space is clean, and the exhaustion cursor
    // lands on the last name of the searched space.
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 2,
        ..cpu_opts()
    };
    let packet = "150013752F15A1BF3C018EB1FC4F26B5FAEB417BB0F1AE8FF07655484EBAA05CB9A927D689";

    let first = cracker.crack(packet, &opts, None);
    assert_eq!(first.room_name.as_deref(), Some("aa"));

    let opts = CrackOptions {
        start_from: first.resume_from.clone(),
        start_from_kind: first.resume_kind.unwrap(),
        ..opts
    };
    let second = cracker.crack(packet, &opts, None);
    assert!(!second.found);
    assert!(!second.aborted);
    assert_eq!(second.resume_kind, Some(ResumeKind::Bruteforce));
    assert_eq!(second.resume_from.as_deref(), Some("99"));
}

#[test]
fn test_resume_strictly_after_cursor() {
    // Resuming exactly at the true room's name must skip it.
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 2,
        start_from: Some("aa".into()),
        start_from_kind: ResumeKind::Bruteforce,
        ..cpu_opts()
    };
    let result = cracker.crack(
        "150013752F15A1BF3C018EB1FC4F26B5FAEB417BB0F1AE8FF07655484EBAA05CB9A927D689",
        &opts,
        None,
    );
    assert!(!result.found, "cursor position itself must be skipped");
}

#[test]
fn test_abort_returns_within_one_batch() {
    let mut cracker = Cracker::new();
    let handle = cracker.abort_handle();

    let aborter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        handle.abort();
    });

    // Length 8 space is ~10^12 candidates; only an abort ends this crack.
    let opts = CrackOptions {
        starting_length: 8,
        max_length: 8,
        ..cpu_opts()
    };
    let started = Instant::now();
    let result = cracker.crack(PACKET_ABLE, &opts, None);
    aborter.join().unwrap();

    assert!(result.aborted);
    assert!(!result.found);
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "abort latency {:?}",
        started.elapsed()
    );
    // The cursor records where the sweep stopped.
    assert_eq!(result.resume_kind, Some(ResumeKind::Bruteforce));
    assert!(result.resume_from.is_some());
}

#[test]
fn test_abort_flag_resets_between_cracks() {
    let mut cracker = Cracker::new();
    cracker.abort();

    // A fresh crack must not observe the stale flag.
    let opts = CrackOptions {
        max_length: 2,
        ..cpu_opts()
    };
    let result = cracker.crack(
        "150013752F15A1BF3C018EB1FC4F26B5FAEB417BB0F1AE8FF07655484EBAA05CB9A927D689",
        &opts,
        None,
    );
    assert!(result.found);
    assert!(!result.aborted);
}

#[test]
fn test_sender_filter_end_to_end() {
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 3,
        require_sender: true,
        ..cpu_opts()
    };
    // "kiwi: dash" carries a sender, so the filter accepts it; with the
    // filter on, the attributed form is delivered verbatim.
    let result = cracker.crack(PACKET_HYPHEN, &opts, None);
    assert!(result.found);
    assert_eq!(result.message.as_deref(), Some("kiwi: dash"));
}

#[test]
fn test_result_serialization_carries_cursor() {
    let mut cracker = Cracker::new();
    let opts = CrackOptions {
        max_length: 2,
        ..cpu_opts()
    };
    let result = cracker.crack(
        "150013752F15A1BF3C018EB1FC4F26B5FAEB417BB0F1AE8FF07655484EBAA05CB9A927D689",
        &opts,
        None,
    );
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["found"], true);
    assert_eq!(json["room_name"], "aa");
    assert_eq!(json["key"], "e147f36926b7b509af9b41b65304dc30");
    assert_eq!(json["resume_from"], "aa");
    assert_eq!(json["resume_kind"], "bruteforce");
    assert!(json.get("error").is_none());
}
