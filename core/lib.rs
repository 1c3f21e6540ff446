// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The frame/sample-accurate indexing and seeking engine itself: container-
//! and codec-agnostic, driven entirely through the collaborator traits in
//! [`contracts`]. Mirrors the teacher's `db` crate in shape (a core data/
//! query layer, separate from both its storage backing and its FFI
//! collaborators), though the data model itself is unrelated.

pub mod audio_source;
pub mod cache;
pub mod contracts;
pub mod index;
pub mod indexer;
pub mod track;
pub mod video_source;

pub use contracts::{
    AudioDecoder, BitstreamParser, DecodedAudio, DecodedVideoFrame, Demuxer, FrameType,
    Packet, ParsedPicture, PictureStructure, ProgressCallback, SampleFormat, Timebase, TrackKind,
    VideoDecoder,
};
pub use index::{FileSignature, Index};
pub use indexer::{ErrorHandlingMode, IndexerConfig};
pub use track::{FrameRecord, TrackTable};

#[cfg(test)]
pub mod testutil;
