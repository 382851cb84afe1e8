use crate::structs::SearchFileConfig;

#[test]
fn empty_file_gives_defaults() {
    let config: SearchFileConfig = toml::from_str("").unwrap();
    let params = config.to_params();
    let defaults = mcts::SearchParams::default();
    assert_eq!(params.max_batch_size, defaults.max_batch_size);
    assert_eq!(params.transposition_mode, defaults.transposition_mode);
    assert_eq!(params.arena_capacity, defaults.arena_capacity);
    assert!((params.c_puct - defaults.c_puct).abs() < 1e-6);
}

#[test]
fn partial_section_keeps_other_defaults() {
    let config: SearchFileConfig = toml::from_str(
        r#"
        [batching]
        max_batch_size = 256
        flow_direct_overlapped = false
        "#,
    )
    .unwrap();
    assert_eq!(config.batching.max_batch_size, 256);
    assert!(!config.batching.flow_direct_overlapped);
    // Untouched fields fall back.
    assert!(config.batching.flow_dual_selectors);
    assert_eq!(config.search.seed, 0);
}

#[test]
fn full_file_round_trips_into_params() {
    let config: SearchFileConfig = toml::from_str(
        r#"
        [search]
        c_puct = 2.0
        dirichlet_alpha = 0.3
        seed = 42

        [batching]
        flow_split_selects = false
        max_batch_size = 512
        padded_batch_sizing = true
        padded_extra_nodes_base = 16
        padded_extra_nodes_multiplier = 0.25

        [transpositions]
        transposition_mode = "single_node_copy"
        max_transposition_root_applications_fixed = 2
        transposition_use_transposed_q = true

        [memory]
        use_large_pages = true
        arena_capacity = 1000
        "#,
    )
    .unwrap();
    let params = config.to_params();
    assert!((params.c_puct - 2.0).abs() < 1e-6);
    assert_eq!(params.seed, 42);
    assert!(!params.flow_split_selects);
    assert_eq!(params.max_batch_size, 512);
    assert!(params.padded_batch_sizing);
    assert_eq!(params.padded_extra_nodes_base, 16);
    assert_eq!(params.transposition_mode, mcts::TranspositionMode::SingleNodeCopy);
    assert_eq!(params.max_transposition_root_applications_fixed, 2);
    assert!(params.transposition_use_transposed_q);
    assert!(params.use_large_pages);
    assert_eq!(params.arena_capacity, 1000);
}

#[test]
fn unknown_transposition_mode_falls_back() {
    let config: SearchFileConfig = toml::from_str(
        r#"
        [transpositions]
        transposition_mode = "wormhole"
        "#,
    )
    .unwrap();
    assert_eq!(
        config.to_params().transposition_mode,
        mcts::TranspositionMode::SingleNodeDeferredCopy
    );
}

#[test]
fn env_override_applies() {
    // Env vars are process-global; pick names no other test touches.
    std::env::set_var("SEARCH_MAX_BATCH_SIZE", "77");
    std::env::set_var("SEARCH_TRANSPOSITION_MODE", "shared_subtree");
    let config = crate::loader::apply_env_overrides(SearchFileConfig::default());
    std::env::remove_var("SEARCH_MAX_BATCH_SIZE");
    std::env::remove_var("SEARCH_TRANSPOSITION_MODE");
    assert_eq!(config.batching.max_batch_size, 77);
    assert_eq!(
        config.to_params().transposition_mode,
        mcts::TranspositionMode::SharedSubtree
    );
}
