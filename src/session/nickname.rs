//! Nickname generation

use rand::seq::SliceRandom;
use rand::Rng;

/// Longest nickname most networks accept
pub const MAX_NICK_LEN: usize = 16;

const ADJECTIVES: &[&str] = &["Dark", "Web", "Quick", "Silent", "Swift", "Digital", "Cyber", "Net"];
const NOUNS: &[&str] = &["Horse", "Wolf", "Eagle", "Lion", "Hawk", "Fox", "Bear", "Tiger"];

/// Random `AdjectiveNoun123` nickname, sometimes with a short letter tail
pub fn random_nickname() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Reader");
    let mut nick = format!("{}{}{}", adjective, noun, rng.gen_range(100..1000));

    if rng.gen_bool(0.5) {
        if rng.gen_bool(0.5) {
            nick.push('_');
        }
        nick.extend((0..2).map(|_| rng.gen_range(b'a'..=b'z') as char));
    }
    truncate(nick)
}

/// Nickname for a retry after a collision: base plus random digits
pub fn with_suffix(base: &str, digits: u32) -> String {
    let mut rng = rand::thread_rng();
    let digits = digits.clamp(1, 6) as usize;
    let suffix: String = (0..digits).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect();

    let keep = MAX_NICK_LEN.saturating_sub(digits);
    let head: String = base.chars().take(keep).collect();
    format!("{}{}", head, suffix)
}

fn truncate(nick: String) -> String {
    nick.chars().take(MAX_NICK_LEN).collect()
}
