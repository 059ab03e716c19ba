//! Greeting text and response construction.

use greeter_core::{
    DEFAULT_LANGUAGE, Error, Result,
    proto::{HelloRequest, HelloResponse},
    resolve_language,
};

/// Salutation for a locale code. Unknown locales get the English one.
pub fn salutation(language: &str) -> &'static str {
    match language.trim().to_ascii_lowercase().as_str() {
        "es" => "Hola",
        "fr" => "Bonjour",
        "de" => "Hallo",
        "it" => "Ciao",
        "pt" => "Olá",
        _ => "Hello",
    }
}

/// Rejects requests without a name.
pub fn validate(request: &HelloRequest) -> Result<()> {
    if request.name.trim().is_empty() {
        return Err(Error::InvalidRequest {
            reason: "name must not be empty".to_string(),
        });
    }
    Ok(())
}

/// `"{salutation}, {names}!"`, with names joined by `", "`.
pub fn greeting<S: AsRef<str>>(names: &[S], language: &str) -> String {
    let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    format!("{}, {}!", salutation(language), names.join(", "))
}

/// Greets the sender of `request`.
pub fn greet(request: &HelloRequest) -> String {
    let language = resolve_language(Some(&request.language), DEFAULT_LANGUAGE);
    greeting(&[request.name.as_str()], language)
}

/// Wraps `message` with the current time and the serving thread.
pub fn respond(message: String) -> HelloResponse {
    HelloResponse {
        message,
        timestamp: chrono::Local::now().to_rfc3339(),
        thread_info: describe_current_thread(),
    }
}

fn describe_current_thread() -> String {
    let thread = std::thread::current();
    format!(
        "Server Thread: {} (ID: {:?})",
        thread.name().unwrap_or("<unnamed>"),
        thread.id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use greeter_core::hello_request;

    #[test]
    fn known_languages_are_localized() {
        assert_eq!(greet(&hello_request("Ada", Some("es"))), "Hola, Ada!");
        assert_eq!(greet(&hello_request("Ada", Some("FR"))), "Bonjour, Ada!");
        assert_eq!(greet(&hello_request("Ada", Some("pt"))), "Olá, Ada!");
    }

    #[test]
    fn unknown_or_missing_language_falls_back_to_english() {
        assert_eq!(greet(&hello_request("Ada", Some("tlh"))), "Hello, Ada!");
        let blank = HelloRequest {
            name: "Ada".to_string(),
            language: String::new(),
        };
        assert_eq!(greet(&blank), "Hello, Ada!");
    }

    #[test]
    fn several_names_share_one_greeting() {
        assert_eq!(
            greeting(&["Alice", "Bob", "Charlie"], "de"),
            "Hallo, Alice, Bob, Charlie!"
        );
    }

    #[test]
    fn blank_names_are_invalid() {
        let err = validate(&hello_request("  ", None)).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        assert!(validate(&hello_request("Ada", None)).is_ok());
    }

    #[test]
    fn responses_carry_an_rfc3339_timestamp() {
        let response = respond("hi".to_string());
        assert!(chrono::DateTime::parse_from_rfc3339(&response.timestamp).is_ok());
        assert!(response.thread_info.starts_with("Server Thread: "));
    }
}
