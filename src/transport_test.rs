use super::*;

#[test]
fn https_hub_url_becomes_wss_with_token() {
    let url = hub_socket_url("https://api.example.test/chathub", "abc").expect("url");
    assert_eq!(url.as_str(), "wss://api.example.test/chathub?access_token=abc");
}

#[test]
fn existing_query_is_preserved_and_token_encoded() {
    let url = hub_socket_url("http://localhost:5000/hub?v=2", "a b+c").expect("url");
    assert_eq!(url.scheme(), "ws");
    let pairs: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    assert_eq!(
        pairs,
        vec![("v".to_owned(), "2".to_owned()), ("access_token".to_owned(), "a b+c".to_owned())]
    );
}

#[test]
fn ws_scheme_is_kept() {
    let url = hub_socket_url("ws://127.0.0.1:9000/hub", "t").expect("url");
    assert_eq!(url.as_str(), "ws://127.0.0.1:9000/hub?access_token=t");
}

#[test]
fn unsupported_scheme_is_rejected() {
    let err = hub_socket_url("ftp://example.test/hub", "t").expect_err("scheme");
    assert!(err.to_string().contains("unsupported hub URL scheme"));
}

#[test]
fn garbage_url_is_rejected() {
    assert!(matches!(hub_socket_url("not a url", "t"), Err(ChatError::ConfigParse(_))));
}
