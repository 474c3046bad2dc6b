use crate::convert::{MetaMaker, Signature};
use crate::user_map::UserMap;

/// Builds git signatures and tag messages: mapped authors come from the
/// user map, everything else goes through the configurable templates.
pub(crate) struct CvsMetaMaker<'a> {
    user_map: &'a UserMap,
    jinja_env: minijinja::Environment<'a>,
}

impl<'a> CvsMetaMaker<'a> {
    pub(crate) fn new(
        user_map: &'a UserMap,
        user_fallback_template: &'a str,
        tag_msg_template: &'a str,
    ) -> Result<Self, String> {
        let mut jinja_env = minijinja::Environment::empty();
        jinja_env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        jinja_env
            .add_template("user_fallback", user_fallback_template)
            .map_err(|e| format!("failed to parse user fallback template: {e}"))?;
        jinja_env
            .add_template("tag_msg", tag_msg_template)
            .map_err(|e| format!("failed to parse tag message template: {e}"))?;

        Ok(Self {
            user_map,
            jinja_env,
        })
    }
}

impl MetaMaker for CvsMetaMaker<'_> {
    fn author_signature(&self, cvs_author: &str) -> Result<Signature, String> {
        if let Some((name, email)) = self.user_map.get(cvs_author) {
            return Ok(Signature {
                name: name.into(),
                email: email.into(),
            });
        }

        let template = self.jinja_env.get_template("user_fallback").unwrap();
        let author = template
            .render(minijinja::context! { cvs_author })
            .map_err(|e| format!("failed to render fallback author: {e}"))?;
        let Some((name, email)) = split_author_name_email(&author) else {
            return Err(format!("author {author:?} is not in \"name <email>\" format"));
        };

        Ok(Signature {
            name: name.into(),
            email: email.into(),
        })
    }

    fn tag_message(&self, git_name: &str, cvs_name: &str) -> Result<String, String> {
        let template = self.jinja_env.get_template("tag_msg").unwrap();
        template
            .render(minijinja::context! {
                tag => git_name,
                cvs_tag => cvs_name,
            })
            .map_err(|e| format!("failed to render tag message: {e}"))
            .map(|message| message.replace("\r\n", "\n"))
    }
}

fn split_author_name_email(raw: &str) -> Option<(&str, &str)> {
    if raw.contains('\n') {
        return None;
    }

    let i_lt = raw.find('<')?;

    let name = raw[..i_lt].trim_matches(' ');
    let email = raw[(i_lt + 1)..]
        .trim_end_matches(' ')
        .strip_suffix('>')?
        .trim_matches(' ');

    Some((name, email))
}

#[cfg(test)]
mod tests {
    use super::CvsMetaMaker;
    use crate::convert::MetaMaker as _;
    use crate::user_map::UserMap;

    const FALLBACK: &str = "{{ cvs_author }} <{{ cvs_author }}@cvs.invalid>";
    const TAG_MSG: &str = "{{ tag }} [[CVS tag: {{ cvs_tag }}]]";

    #[test]
    fn test_mapped_author() {
        let text = b"anna = Anna Smith <anna@example.org>\n";
        let user_map = UserMap::parse(&mut &text[..]).unwrap();
        let meta = CvsMetaMaker::new(&user_map, FALLBACK, TAG_MSG).unwrap();

        let sig = meta.author_signature("anna").unwrap();
        assert_eq!(sig.name, "Anna Smith");
        assert_eq!(sig.email, "anna@example.org");
    }

    #[test]
    fn test_fallback_author() {
        let user_map = UserMap::new();
        let meta = CvsMetaMaker::new(&user_map, FALLBACK, TAG_MSG).unwrap();

        let sig = meta.author_signature("carol").unwrap();
        assert_eq!(sig.name, "carol");
        assert_eq!(sig.email, "carol@cvs.invalid");
    }

    #[test]
    fn test_tag_message() {
        let user_map = UserMap::new();
        let meta = CvsMetaMaker::new(&user_map, FALLBACK, TAG_MSG).unwrap();

        assert_eq!(
            meta.tag_message("rel-1", "REL_1").unwrap(),
            "rel-1 [[CVS tag: REL_1]]",
        );
    }

    #[test]
    fn test_bad_fallback_output() {
        let user_map = UserMap::new();
        let meta = CvsMetaMaker::new(&user_map, "{{ cvs_author }}", TAG_MSG).unwrap();
        assert!(meta.author_signature("carol").is_err());
    }
}
