use cookie::{Cookie, CookieJar};

/// Read access to the cookies a client sent.
pub trait RequestCookies {
    fn cookie(&self, name: &str) -> Option<&str>;
}

/// Write access to the cookies of a response.
pub trait ResponseCookies {
    fn set_cookie(&mut self, cookie: Cookie<'static>);
}

impl RequestCookies for CookieJar {
    fn cookie(&self, name: &str) -> Option<&str> {
        self.get(name).map(Cookie::value)
    }
}

impl ResponseCookies for CookieJar {
    fn set_cookie(&mut self, cookie: Cookie<'static>) {
        self.add(cookie);
    }
}
