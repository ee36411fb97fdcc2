mod awards;
mod ranking;
mod stats;

pub use awards::{
    build_announcement, AwardFailure, AwardPipeline, AwardState, AWARDS_FILE, AWARD_COLOR,
    AWARD_TITLE,
};
pub use ranking::{
    compute_ranking, run_midnight_loop, DailyRanking, MessageEntry, MvpEntry, RankingService,
    TopThree, VoiceEntry, Winners, RANKING_FILE,
};
pub use stats::{DailyStats, DayActivity, STATS_FILE};
