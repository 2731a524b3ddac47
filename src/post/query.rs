use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, ORIGIN,
    REFERER,
};
use url::Url;

use super::credentials::Credentials;
use super::reference::PostReference;
use crate::error::{Error, Result};

const TWEET_RESULT_PATH: &str = "graphql/7xflPyRiUxGVbJd4uWmbfg/TweetResultByRestId";

const FEATURES: &str = r#"{"creator_subscriptions_tweet_preview_api_enabled":true,"communities_web_enable_tweet_community_results_fetch":true,"c9s_tweet_anatomy_moderator_badge_enabled":true,"articles_preview_enabled":true,"tweetypie_unmention_optimization_enabled":true,"responsive_web_edit_tweet_api_enabled":true,"graphql_is_translatable_rweb_tweet_is_translatable_enabled":true,"view_counts_everywhere_api_enabled":true,"longform_notetweets_consumption_enabled":true,"responsive_web_twitter_article_tweet_consumption_enabled":true,"tweet_awards_web_tipping_enabled":false,"creator_subscriptions_quote_tweet_preview_enabled":false,"freedom_of_speech_not_reach_fetch_enabled":true,"standardized_nudges_misinfo":true,"tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled":true,"tweet_with_visibility_results_prefer_gql_media_interstitial_enabled":true,"rweb_video_timestamps_enabled":true,"longform_notetweets_rich_text_read_enabled":true,"longform_notetweets_inline_media_enabled":true,"rweb_tipjar_consumption_enabled":true,"responsive_web_graphql_exclude_directive_enabled":true,"verified_phone_label_enabled":false,"responsive_web_graphql_skip_user_profile_image_extensions_enabled":false,"responsive_web_graphql_timeline_navigation_enabled":true,"responsive_web_enhance_cards_enabled":false}"#;

const FIELD_TOGGLES: &str = r#"{"withArticleRichContentState":true,"withArticlePlainText":false}"#;

/// An authenticated API request for one post.
#[derive(Debug, Clone)]
pub struct PostQuery {
    pub url: Url,
    pub headers: HeaderMap,
}

pub fn build_query(
    api_base: &Url,
    site_base: &Url,
    post: &PostReference,
    credentials: &Credentials,
) -> Result<PostQuery> {
    let variables = serde_json::json!({
        "tweetId": post.id,
        "withCommunity": false,
        "includePromotedContent": false,
        "withVoice": false,
    })
    .to_string();

    let mut url = api_base
        .join(TWEET_RESULT_PATH)
        .map_err(|e| Error::InvalidUrl(format!("{api_base}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("variables", &variables)
        .append_pair("features", FEATURES)
        .append_pair("fieldToggles", FIELD_TOGGLES);

    let origin = site_base.as_str().trim_end_matches('/');
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, header(&format!("Bearer {}", credentials.bearer))?);
    headers.insert(
        HeaderName::from_static("x-guest-token"),
        header(&credentials.guest_token)?,
    );
    headers.insert(COOKIE, header(&format!("gt={}", credentials.guest_token))?);
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        HeaderName::from_static("x-twitter-active-user"),
        HeaderValue::from_static("yes"),
    );
    headers.insert(
        HeaderName::from_static("x-twitter-client-language"),
        HeaderValue::from_static("en"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(REFERER, header(&format!("{origin}/"))?);
    headers.insert(ORIGIN, header(origin)?);

    Ok(PostQuery { url, headers })
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::TokenNotFound("header-safe token"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            bearer: "AAAA%3Dtoken".to_string(),
            guest_token: "1790025150592598265".to_string(),
        }
    }

    fn build() -> PostQuery {
        let post = PostReference::parse("https://x.com/dogs/status/1742878545549087076").unwrap();
        build_query(
            &Url::parse("https://api.twitter.com").unwrap(),
            &Url::parse("https://twitter.com").unwrap(),
            &post,
            &credentials(),
        )
        .unwrap()
    }

    #[test]
    fn test_query_url_carries_post_id() {
        let query = build();
        assert_eq!(query.url.path(), "/graphql/7xflPyRiUxGVbJd4uWmbfg/TweetResultByRestId");

        let variables = query
            .url
            .query_pairs()
            .find(|(k, _)| k == "variables")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let variables: serde_json::Value = serde_json::from_str(&variables).unwrap();
        assert_eq!(variables["tweetId"], "1742878545549087076");

        assert!(query.url.query_pairs().any(|(k, _)| k == "features"));
        assert!(query.url.query_pairs().any(|(k, _)| k == "fieldToggles"));
    }

    #[test]
    fn test_query_headers() {
        let query = build();
        assert_eq!(query.headers[AUTHORIZATION], "Bearer AAAA%3Dtoken");
        assert_eq!(query.headers["x-guest-token"], "1790025150592598265");
        assert_eq!(query.headers[COOKIE], "gt=1790025150592598265");
        assert_eq!(query.headers[REFERER], "https://twitter.com/");
        assert_eq!(query.headers[ORIGIN], "https://twitter.com");
    }

    #[test]
    fn test_features_are_valid_json() {
        assert!(serde_json::from_str::<serde_json::Value>(FEATURES).is_ok());
        assert!(serde_json::from_str::<serde_json::Value>(FIELD_TOGGLES).is_ok());
    }

    #[test]
    fn test_unsafe_token_is_rejected() {
        let post = PostReference::parse("https://x.com/dogs/status/1").unwrap();
        let creds = Credentials {
            bearer: "bad\ntoken".to_string(),
            guest_token: "1".to_string(),
        };
        let result = build_query(
            &Url::parse("https://api.twitter.com").unwrap(),
            &Url::parse("https://twitter.com").unwrap(),
            &post,
            &creds,
        );
        assert!(result.is_err());
    }
}
