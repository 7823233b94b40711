use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use crate::client::config::Config;
use crate::client::consts::AUTHORIZATION_HEADER;

pub fn build_request(
    url: &str,
    config: &Config,
) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = url.into_client_request()?;
    if let Some(token) = config.token() {
        request.headers_mut()
            .insert(
                AUTHORIZATION_HEADER,
                format!("Bearer {}", token.expose_secret()).as_str().parse()?
            );
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_only_when_token_set() {
        let url = "ws://127.0.0.1:1/api/ws/asr";
        let request = build_request(url, &Config::builder().build()).unwrap();
        assert_eq!(request.uri().path(), "/api/ws/asr");

        let config = Config::builder().with_token("abc").build();
        let request = build_request(url, &config).unwrap();
        assert_eq!(request.headers().get(AUTHORIZATION_HEADER).unwrap(), "Bearer abc");
    }
}
