use scene_reel::compositor;
use scene_reel::{ComposeError, TransitionPolicy, TransitionSpec, compose};
use std::path::PathBuf;

#[tokio::test]
async fn empty_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");

    let err = compose(&[], TransitionSpec::default(), &output)
        .await
        .unwrap_err();

    assert!(matches!(err, ComposeError::EmptyInput));
    assert!(!output.exists());
}

#[tokio::test]
async fn missing_source_is_named_and_nothing_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("scene_1.mp4");
    std::fs::write(&present, b"not really a video").unwrap();
    let missing = dir.path().join("scene_2.mp4");
    let output = dir.path().join("merged.mp4");

    let err = compose(
        &[present, missing.clone()],
        TransitionSpec::default(),
        &output,
    )
    .await
    .unwrap_err();

    match err {
        ComposeError::SourceNotFound { path } => assert_eq!(path, missing),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn non_positive_transition_is_rejected_before_probing() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("a.mp4");
    std::fs::write(&clip, b"").unwrap();

    let spec = TransitionSpec::new(TransitionPolicy::Crossfade, 0.0);
    let err = compositor::plan(&[clip.clone(), clip], spec)
        .await
        .unwrap_err();

    assert!(matches!(err, ComposeError::InvalidTransition { .. }));
}

#[tokio::test]
async fn directory_is_not_a_source() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("merged.mp4");
    let as_dir: PathBuf = dir.path().to_path_buf();

    let err = compose(&[as_dir], TransitionSpec::default(), &output)
        .await
        .unwrap_err();

    assert!(matches!(err, ComposeError::SourceNotFound { .. }));
}

#[tokio::test]
async fn unreadable_media_is_a_decode_error_naming_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("a.mp4");
    let other = dir.path().join("b.mp4");
    std::fs::write(&broken, b"this is plain text, not a video").unwrap();
    std::fs::write(&other, b"neither is this").unwrap();
    let output = dir.path().join("merged.mp4");

    let err = compose(
        &[broken.clone(), other],
        TransitionSpec::default(),
        &output,
    )
    .await
    .unwrap_err();

    match err {
        ComposeError::Decode { path, .. } => assert_eq!(path, broken),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());

    let mut left: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, vec!["a.mp4", "b.mp4"]);
}
