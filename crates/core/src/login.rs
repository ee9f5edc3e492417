//! Session entry points.
//!
//! The supported and recommended path is ingesting a serialized app state
//! (cookies exported from a logged-in browser). Password login drives the
//! platform's device-based form and works only on accounts without an
//! additional verification challenge; any challenge surfaces as a distinct
//! authentication error instead of a retry loop.

use std::sync::{Arc, LazyLock};

use msgr_protocol::{
    ALT_USER_ID_COOKIE, SESSION_SECRET_COOKIE, SessionOptions, USER_ID_COOKIE,
};
use msgr_runtime::{CookieJar, HttpTransport, normalize, validate_identity};
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// How a session is established.
pub enum Credentials {
    /// Serialized cookie state from a prior session or a browser export.
    /// Accepted in any of the formats [`normalize`] understands.
    AppState(String),
    /// Plain credential login. Fails on accounts protected by two-factor
    /// or login-approval challenges.
    Password { email: String, password: String },
}

const LOGIN_PAGE_URL: &str = "https://www.facebook.com/login";
const LOGIN_SUBMIT_URL: &str = "https://www.facebook.com/login/device-based/regular/login/";

static HIDDEN_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<input[^>]*type="hidden"[^>]*name="([^"]+)"[^>]*value="([^"]*)""#)
        .expect("hidden input pattern is valid")
});

/// Fills the cookie jar from the given credentials and returns the HTTP
/// transport bound to it. No page scraping happens here; the caller runs
/// the bootstrap afterwards.
pub(crate) async fn establish(
    credentials: Credentials,
    options: &SessionOptions,
) -> Result<(Arc<CookieJar>, HttpTransport)> {
    let jar = Arc::new(CookieJar::new());
    let http = HttpTransport::new(Arc::clone(&jar), options)?;

    match credentials {
        Credentials::AppState(raw) => {
            let cookies = normalize(&raw)?;
            validate_identity(&cookies)?;
            debug!(count = cookies.len(), "ingested app state");
            for cookie in cookies {
                jar.set(cookie);
            }
        }
        Credentials::Password { email, password } => {
            password_login(&http, &jar, &email, &password).await?;
        }
    }
    Ok((jar, http))
}

/// Drives the device-based login form: fetch the page, echo back every
/// hidden input, submit the credentials, then verify the jar received a
/// logged-in identity.
async fn password_login(
    http: &HttpTransport,
    jar: &CookieJar,
    email: &str,
    password: &str,
) -> Result<()> {
    let page = http.get(LOGIN_PAGE_URL, &[]).await?;
    let mut form = hidden_inputs(&page.body);
    debug!(hidden = form.len(), "scraped login form");
    form.push(("email".to_string(), email.to_string()));
    form.push(("pass".to_string(), password.to_string()));
    form.push(("login".to_string(), "1".to_string()));

    let response = http.post_form(LOGIN_SUBMIT_URL, &form).await?;

    if jar.get(USER_ID_COOKIE).is_none() && jar.get(ALT_USER_ID_COOKIE).is_none() {
        if response.body.contains("checkpoint") {
            return Err(Error::Authentication(
                "login hit a verification challenge (two-factor or device approval); \
                 complete it in a browser and log in with the exported app state instead"
                    .into(),
            ));
        }
        return Err(Error::Authentication(
            "login rejected; the credentials were not accepted".into(),
        ));
    }
    if jar.get(SESSION_SECRET_COOKIE).is_none() {
        return Err(Error::Authentication(format!(
            "login produced no {SESSION_SECRET_COOKIE} cookie; the session is unusable"
        )));
    }
    info!("password login succeeded");
    Ok(())
}

fn hidden_inputs(html: &str) -> Vec<(String, String)> {
    HIDDEN_INPUT
        .captures_iter(html)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}
