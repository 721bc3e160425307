use anyhow::Context;
use rand::{seq::SliceRandom, Rng};
use time::{Duration, OffsetDateTime};
use tracing::info;

use super::{AccessorConfig, DataAccessor, EntityKind};
use crate::{
    auth::password::hash_password,
    models::{Ticket, TicketStatus, User},
};

const FIRST_NAMES: [&str; 15] = [
    "John", "Jane", "Mary", "James", "Lisa", "Michael", "Sarah", "David", "Emily", "Charles",
    "Sophia", "Lucas", "Olivia", "Ethan", "Mia",
];
const LAST_NAMES: [&str; 15] = [
    "Doe", "Smith", "Johnson", "Williams", "Brown", "Davis", "Miller", "Wilson", "Moore", "Taylor",
    "Anderson", "Thomas", "Jackson", "White", "Harris",
];
pub const TICKET_COUNT: i64 = 30;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub users: usize,
    pub tickets: usize,
}

/// Fills an empty store with demo users and tickets. Tables that already
/// hold rows are left alone.
pub async fn seed_demo_data(data: &mut DataAccessor) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    if data.count::<User>().await? == 0 {
        let now = OffsetDateTime::now_utc();
        let users = FIRST_NAMES
            .iter()
            .zip(LAST_NAMES.iter().cycle().skip(3))
            .map(|(first, last)| demo_user(first, last, now))
            .collect::<anyhow::Result<Vec<_>>>()?;
        report.users = data.create_many(users).await.context("seed users")?.len();
    }

    if data.count::<Ticket>().await? > 0 {
        info!("tickets already exist, skipping ticket seeding");
        return Ok(report);
    }

    let users = data.all::<User>().await?;
    if users.is_empty() {
        info!("no users found, skipping ticket seeding");
        return Ok(report);
    }

    let mut rng = rand::thread_rng();
    let now = OffsetDateTime::now_utc();
    let mut tickets = Vec::with_capacity(TICKET_COUNT as usize);
    for i in 1..=TICKET_COUNT {
        let Some(author) = users.choose(&mut rng) else {
            continue;
        };
        let created_at = now - Duration::days(rng.gen_range(5..10));
        let mut ticket = Ticket::new(
            format!("Ticket {i}: Issue {i}"),
            format!("This is a description for issue {i}. More details can be found here."),
            author.id,
            created_at,
        );
        let modified_at = now - Duration::days(rng.gen_range(0..5));
        // every third ticket stays open
        let status = if i % 3 == 0 {
            TicketStatus::Open
        } else {
            TicketStatus::Closed
        };
        ticket.set_status(status, modified_at);
        tickets.push(ticket);
    }
    report.tickets = data.create_many(tickets).await.context("seed tickets")?.len();

    info!(users = report.users, tickets = report.tickets, "demo data seeded");
    Ok(report)
}

fn demo_user(first: &str, last: &str, now: OffsetDateTime) -> anyhow::Result<User> {
    let username = format!("{}{}", first.to_lowercase(), last.to_lowercase());
    let hash = hash_password(&format!("{first}{last}123!"))?;
    let mut user = User::new(
        username.clone(),
        format!("{username}@maintenanceportal.com"),
        hash,
        first.to_string(),
        last.to_string(),
        None,
        now,
    );
    user.bio = Some(format!("Hello, I'm {first} {last}, a user of Maintenance Portal."));
    Ok(user)
}

pub fn seed_config() -> AccessorConfig {
    AccessorConfig::new([EntityKind::User, EntityKind::Ticket])
}
