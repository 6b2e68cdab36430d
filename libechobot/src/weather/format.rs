//! Human-readable weather messages

use super::feed::Observation;

const HPA_TO_MMHG: f64 = 0.75006;

/// Condition names by forecast symbol number
const SYMBOLS: &[(&str, &str)] = &[
    ("1", "Ясно"),
    ("2", "Малооблачно"),
    ("3", "Переменная облачность"),
    ("4", "Облачно"),
    ("5", "Ливень"),
    ("6", "Ливень с грозой"),
    ("7", "Мокрый снег с дождём"),
    ("8", "Снегопад"),
    ("9", "Дождь"),
    ("10", "Сильный дождь"),
    ("11", "Гроза"),
    ("12", "Мокрый снег"),
    ("13", "Снег"),
    ("14", "Снег с грозой"),
    ("15", "Туман"),
];

/// Wind names by compass code
const WINDS: &[(&str, &str)] = &[
    ("N", "северный"),
    ("NNE", "северо-северо-восточный"),
    ("NE", "северо-восточный"),
    ("ENE", "восточно-северо-восточный"),
    ("E", "восточный"),
    ("ESE", "восточно-юго-восточный"),
    ("SE", "юго-восточный"),
    ("SSE", "юго-юго-восточный"),
    ("S", "южный"),
    ("SSW", "юго-юго-западный"),
    ("SW", "юго-западный"),
    ("WSW", "западо-юго-западный"),
    ("W", "западный"),
    ("WNW", "западо-северо-западный"),
    ("NW", "северо-западный"),
    ("NNW", "северо-северо-западный"),
];

fn lookup(table: &[(&str, &'static str)], code: &str) -> String {
    table
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| code.to_string())
}

pub fn condition(code: &str) -> String {
    lookup(SYMBOLS, code)
}

pub fn wind(code: &str) -> String {
    lookup(WINDS, code)
}

/// Grammatical form of "degree" for a whole number
pub fn degree_noun(t: i64) -> &'static str {
    let n = t.unsigned_abs();
    if n % 10 == 1 && n % 100 != 11 {
        "градус"
    } else if (2..=4).contains(&(n % 10)) && !(12..=14).contains(&(n % 100)) {
        "градуса"
    } else {
        "градусов"
    }
}

/// Rounded temperature, `+` prefixed unless negative
pub fn signed_temperature(celsius: f64) -> (i64, String) {
    let t = celsius.round() as i64;
    let text = if t < 0 { t.to_string() } else { format!("+{}", t) };
    (t, text)
}

pub fn mmhg(hpa: f64) -> i64 {
    (hpa * HPA_TO_MMHG).floor() as i64
}

/// Body shared by every weather message
pub fn describe(obs: &Observation) -> String {
    let (t, temperature) = signed_temperature(obs.temperature);
    format!(
        "{}, {} {}. Давление {} мм рт.ст. Ветер {}, {} м/с.",
        condition(&obs.symbol),
        temperature,
        degree_noun(t),
        mmhg(obs.pressure_hpa),
        wind(&obs.wind_code),
        obs.wind_mps as i64
    )
}

pub fn current_message(obs: &Observation, hashtag: &str) -> String {
    format!("Погода на данный момент:\n\n{}\n\n{}", describe(obs), hashtag)
}

pub fn day_message(obs: &Observation, hashtag: &str) -> String {
    format!("Прогноз на завтра, днём:\n\n{}\n\n{}", describe(obs), hashtag)
}

pub fn night_message(obs: &Observation, hashtag: &str) -> String {
    format!("Прогноз на завтра, ночью:\n\n{}\n\n{}", describe(obs), hashtag)
}
