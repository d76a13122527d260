//! Proptest generators for property-based testing.

use proptest::prelude::*;

use ccsync_core::{ChannelKind, SyncOperation};

/// Generate a channel kind.
pub fn channel_kind() -> impl Strategy<Value = ChannelKind> {
    prop_oneof![Just(ChannelKind::Library), Just(ChannelKind::Script)]
}

/// Generate a Lua-ish file name.
pub fn file_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}\\.lua".prop_map(String::from)
}

/// Generate source text, including multi-byte characters.
pub fn source_text(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            8 => proptest::char::range('a', 'z'),
            2 => Just(' '),
            2 => Just('\n'),
            1 => Just('é'),
            1 => Just('日'),
            1 => Just('🦀'),
        ],
        0..=max_len,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

/// Generate a chunk size threshold.
pub fn chunk_limit() -> impl Strategy<Value = usize> {
    1usize..=64
}

/// Parameters for a directory-backed channel.
#[derive(Debug, Clone)]
pub struct DirectoryParams {
    /// Relative file path within the directory and its text.
    pub files: Vec<(String, String)>,
}

impl Arbitrary for DirectoryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::btree_map(
            (prop::option::of("[a-z]{1,6}"), file_name()),
            source_text(200),
            1..8,
        )
        .prop_map(|files| DirectoryParams {
            files: files
                .into_iter()
                .map(|((sub, name), text)| match sub {
                    Some(sub) => (format!("{sub}/{name}"), text),
                    None => (name, text),
                })
                .collect(),
        })
        .boxed()
    }
}

/// Generate the operations of one file.
pub fn file_operations() -> impl Strategy<Value = Vec<SyncOperation>> {
    (channel_kind(), file_name(), source_text(300), chunk_limit())
        .prop_map(|(kind, path, text, limit)| SyncOperation::for_file(kind, &path, &text, limit))
}
