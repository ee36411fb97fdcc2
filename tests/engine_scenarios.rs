use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use refuge_engine::buffs::BuffPlan;
use refuge_engine::daily::AWARD_TITLE;
use refuge_engine::games::GameError;
use refuge_engine::platform::mention;

mod utils;

use utils::*;

#[tokio::test]
async fn bet_win_that_levels_up_lands_in_the_feed() {
    let setup = EngineSetupBuilder::new()
        .with_seed_file("data.json", json!({"100": {"xp": 14400, "level": 12}}))
        .build()
        .await;

    setup.engine.xp.add_xp(100, 2500, GUILD, "pari_xp").await;
    setup.settle().await;

    let feed = setup.feed_messages().await;
    assert_eq!(feed.len(), 1);
    let embed = feed[0].message.embed.as_ref().unwrap();
    assert!(embed.title.starts_with("⬆️ LEVEL UP"));
    let description = embed.description.as_ref().unwrap();
    assert!(description.contains("niveau 13"));
    assert!(description.contains("niv. 12 → niv. 13"));
}

#[tokio::test]
async fn rapid_consecutive_wins_coalesce_into_one_message() {
    let setup = EngineSetupBuilder::new()
        .with_seed_file("data.json", json!({"100": {"xp": 14400, "level": 12}}))
        .build()
        .await;

    setup.engine.xp.add_xp(100, 2500, GUILD, "pari_xp").await;
    setup.engine.xp.add_xp(100, 2700, GUILD, "pari_xp").await;
    setup.settle().await;

    let feed = setup.feed_messages().await;
    assert_eq!(feed.len(), 1);
    let description = feed[0].message.embed.as_ref().unwrap().description.clone().unwrap();
    assert!(description.contains("niv. 14"));
    assert_eq!(setup.engine.router.coalesced_count(), 1);
}

#[tokio::test]
async fn bet_loss_that_levels_down_is_announced() {
    let setup = EngineSetupBuilder::new()
        .with_seed_file("data.json", json!({"100": {"xp": 16900, "level": 13}}))
        .build()
        .await;

    setup.engine.xp.add_xp(100, -2500, GUILD, "pari_xp").await;
    setup.settle().await;

    let feed = setup.feed_messages().await;
    assert_eq!(feed.len(), 1);
    assert!(feed[0]
        .message
        .embed
        .as_ref()
        .unwrap()
        .title
        .starts_with("⬇️ LEVEL DOWN"));
}

#[tokio::test]
async fn award_posts_once_with_three_fields_and_everyone() {
    // yesterday's counters make user 1 MVP, 2 top writer, 3 top voice
    let setup = EngineSetupBuilder::new()
        .with_seed_file(
            "daily_stats.json",
            json!({"2025-03-09": {
                "1": {"messages": 25, "voice": 7000},
                "2": {"messages": 30, "voice": 0},
                "3": {"messages": 0, "voice": 7200},
            }}),
        )
        .build()
        .await;

    let yesterday: NaiveDate = "2025-03-09".parse().unwrap();
    let sealed = setup.engine.ranking.get_ranking(yesterday).await.unwrap();
    assert_eq!(sealed.winners.mvp, Some(1));
    assert_eq!(sealed.winners.msg, Some(2));
    assert_eq!(sealed.winners.vc, Some(3));

    let awards = setup.engine.awards.clone().unwrap();
    awards.maybe_award(&sealed).await;

    let posts: Vec<_> = setup
        .port
        .messages_in(ANNOUNCE_CHANNEL)
        .await
        .into_iter()
        .filter(|m| {
            m.message
                .embed
                .as_ref()
                .map_or(false, |e| e.title == AWARD_TITLE)
        })
        .collect();
    assert_eq!(posts.len(), 1);

    let post = &posts[0];
    assert_eq!(post.message.content.as_deref(), Some("@everyone"));
    assert!(post.message.mention_everyone);
    let embed = post.message.embed.as_ref().unwrap();
    assert_eq!(embed.fields.len(), 3);
    assert_eq!(embed.fields[0].name, "MVP");
    assert!(embed.fields[0].value.contains(&mention(1)));
    assert_eq!(embed.fields[1].name, "Écrivain");
    assert!(embed.fields[1].value.contains(&mention(2)));
    assert_eq!(embed.fields[2].name, "Voix");
    assert!(embed.fields[2].value.contains(&mention(3)));

    assert_eq!(setup.port.holders(GUILD, 61).await, vec![1]);
    assert_eq!(setup.port.holders(GUILD, 62).await, vec![2]);
    assert_eq!(setup.port.holders(GUILD, 63).await, vec![3]);
}

#[tokio::test]
async fn slot_window_closes_at_ten_pm_sharp() {
    let setup = EngineSetupBuilder::new().build().await;
    let slot = setup
        .engine
        .games
        .iter()
        .find(|g| g.slug() == "machine_a_sous")
        .unwrap()
        .clone();

    // 21:59 local
    setup
        .clock
        .set(Utc.with_ymd_and_hms(2025, 3, 10, 20, 59, 0).unwrap());
    assert!(slot.spin(100, GUILD).await.is_ok());

    // 22:01 local
    setup
        .clock
        .set(Utc.with_ymd_and_hms(2025, 3, 10, 21, 1, 0).unwrap());
    match slot.spin(100, GUILD).await {
        Err(GameError::NotOpen { next_open }) => {
            assert_eq!(
                next_open,
                Utc.with_ymd_and_hms(2025, 3, 11, 9, 0, 0).unwrap()
            );
        }
        other => panic!("expected NotOpen, got {other:?}"),
    }
}

#[tokio::test]
async fn a_ticket_buys_one_spin_past_the_daily_quota() {
    let setup = EngineSetupBuilder::new().build().await;
    let roulette = setup
        .engine
        .games
        .iter()
        .find(|g| g.slug() == "pari_xp")
        .unwrap()
        .clone();
    let today: NaiveDate = "2025-03-10".parse().unwrap();

    roulette.store().commit_claim(100, today).await;
    roulette.store().grant_ticket(100).await;

    let outcome = roulette.spin(100, GUILD).await.unwrap();
    assert!(outcome.free_spin);
    assert_eq!(roulette.store().ticket_count(100).await, 0);
    assert!(roulette.store().has_claimed(100, today).await);

    assert!(matches!(
        roulette.spin(100, GUILD).await,
        Err(GameError::AlreadyClaimed { .. })
    ));
}

#[tokio::test]
async fn interrupted_buff_session_ends_quietly_after_restart() {
    let end_at = "2025-03-10T11:00:00.100Z";
    let setup = EngineSetupBuilder::new()
        .with_seed_file(
            "double_voice_xp.json",
            json!({"date": "2025-03-10", "sessions": [
                {"hm": "11:50:00", "started": true, "end": end_at, "ended": false}
            ]}),
        )
        .build()
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let plan: BuffPlan = setup.engine.storage.read("double_voice_xp.json").await;
    assert!(plan.sessions[0].ended);

    let announcements = setup.port.messages_in(ANNOUNCE_CHANNEL).await;
    assert!(!announcements.iter().any(|m| m
        .message
        .embed
        .as_ref()
        .map_or(false, |e| e.title.contains("activé"))));
    assert_eq!(
        announcements
            .iter()
            .filter(|m| m
                .message
                .embed
                .as_ref()
                .map_or(false, |e| e.title.contains("terminé")))
            .count(),
        1
    );
}
