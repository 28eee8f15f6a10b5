//! Core data types: episodes, recall options, temporal queries.

mod episode;
mod search;
mod temporal;

pub use episode::{
    generate_episode_id, source_id_for, Episode, EpisodeType, IMPORTANCE_DECAY_PER_DAY,
};
pub use search::{RecallOptions, RecalledEpisode, SearchHit, SUPERSEDED_PENALTY};
pub use temporal::{parse_temporal, TemporalQuery};
