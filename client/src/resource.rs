extern crate url;

use self::url::Url;
use core::fmt;
use std::ops::Add;

const SEP: char = '/';

/// Server URL builder.
#[derive(Clone)]
pub struct Resource {
    url: Url,
}

impl Resource {
    pub fn new(uri: &str) -> Result<Resource, url::ParseError> {
        let base = Url::parse(uri)?;
        Ok(Resource { url: base })
    }

    pub fn append_path(&mut self, path: &str) -> &mut Self {
        if let Some(segments) = self.url.path_segments() {
            let p = segments
                .chain(path.split(SEP))
                .filter(|x| !x.is_empty())
                .fold(String::new(), |s, x| {
                    let mut y = s.add(x);
                    y.push(SEP);
                    y
                });

            let path_to_set = if path.chars().next_back().unwrap_or_default() == SEP {
                &p
            } else {
                &p[..p.len().saturating_sub(1)]
            };
            self.url.set_path(path_to_set);
        } else {
            let r = self.url.join(path);
            if let Ok(u) = r {
                self.url = u;
            }
        }
        self
    }

    /// Appends a single segment, escaping separators so ids like
    /// `dir-docs/old` stay one segment.
    pub fn append_segment(&mut self, segment: &str) -> &mut Self {
        let escaped = urlencoding::encode(segment);
        self.append_path(&escaped)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
