use glib::MainContext;
use once_cell::sync::Lazy;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn spawn_async<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    RUNTIME.spawn(fut);
}

#[allow(deprecated)]
pub fn glib_channel<T: Send + 'static>() -> (glib::Sender<T>, glib::Receiver<T>) {
    MainContext::channel(glib::Priority::default())
}

/// Runs `fut` on the shared runtime and delivers its result on the GTK main loop.
#[allow(deprecated)]
pub fn run_async_to_main<T, E, Fut>(fut: Fut) -> glib::Receiver<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
    Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
{
    let (tx, rx) = glib_channel::<Result<T, E>>();
    spawn_async(async move {
        let res = fut.await;
        let _ = tx.send(res);
    });
    rx
}

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Formats a phone number by digit count. Anything that isn't 10 to 13 digits
/// is returned as given.
pub fn format_phone(input: &str) -> String {
    let n = digits_only(input);
    match n.len() {
        13 => format!("+{} ({}) {}-{}", &n[..2], &n[2..4], &n[4..9], &n[9..]),
        12 => format!("+{} ({}) {}-{}", &n[..2], &n[2..4], &n[4..8], &n[8..]),
        11 => format!("({}) {}-{}", &n[..2], &n[2..7], &n[7..]),
        10 => format!("({}) {}-{}", &n[..2], &n[2..6], &n[6..]),
        _ => input.to_string(),
    }
}

/// Drops characters outside the Basic Multilingual Plane; the server rejects them.
pub fn filter_bmp(text: &str) -> String {
    text.chars().filter(|c| (*c as u32) <= 0xFFFF).collect()
}

const HONORIFICS: [&str; 2] = ["doutor", "dr."];

/// Name used to greet a contact: the first word, skipping a leading honorific.
pub fn first_name(full_name: &str) -> String {
    let words: Vec<&str> = full_name.split_whitespace().collect();
    match words.as_slice() {
        [] => String::new(),
        [first, second, ..] if HONORIFICS.contains(&first.to_lowercase().as_str()) => {
            second.to_string()
        }
        [first, ..] => first.to_string(),
    }
}

pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Header rendering of a contact name.
pub fn display_name(name: &str) -> String {
    if name.chars().count() > 20 {
        let head: String = name.chars().take(20).collect();
        format!("{}...", head).to_uppercase()
    } else {
        name.to_uppercase()
    }
}

pub fn timestamp_now(fmt: &str) -> String {
    chrono::Local::now().format(fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_phone_by_digit_count() {
        assert_eq!(format_phone("5511987654321"), "+55 (11) 98765-4321");
        assert_eq!(format_phone("551187654321"), "+55 (11) 8765-4321");
        assert_eq!(format_phone("11987654321"), "(11) 98765-4321");
        assert_eq!(format_phone("1187654321"), "(11) 8765-4321");
        assert_eq!(format_phone("(11) 98765-4321"), "(11) 98765-4321");
    }

    #[test]
    fn unknown_lengths_pass_through_untouched() {
        assert_eq!(format_phone("12345"), "12345");
        assert_eq!(format_phone(""), "");
        assert_eq!(format_phone("ramal 22"), "ramal 22");
    }

    #[test]
    fn bmp_filter_drops_astral_chars() {
        assert_eq!(filter_bmp("Olá 😀 mundo ✓"), "Olá  mundo ✓");
        assert_eq!(filter_bmp(""), "");
    }

    #[test]
    fn first_name_skips_honorific() {
        assert_eq!(first_name("Maria da Silva"), "Maria");
        assert_eq!(first_name("Dr. João Souza"), "João");
        assert_eq!(first_name("doutor Carlos"), "Carlos");
        assert_eq!(first_name("Dr."), "Dr.");
        assert_eq!(first_name("   "), "");
    }

    #[test]
    fn title_case_normalises_words() {
        assert_eq!(title_case("mARIA da sILVA"), "Maria Da Silva");
        assert_eq!(title_case("ana-clara"), "Ana-Clara");
    }

    #[test]
    fn display_name_truncates_long_names() {
        assert_eq!(display_name("Ana"), "ANA");
        assert_eq!(
            display_name("Maria Aparecida dos Santos"),
            "MARIA APARECIDA DOS ..."
        );
    }

    #[test]
    fn normalize_url_adds_scheme() {
        assert_eq!(normalize_url("localhost:21465/"), "http://localhost:21465");
        assert_eq!(normalize_url("https://wpp.example"), "https://wpp.example");
    }
}
