/// Attribute marking an already-instrumented document; the rewriter
/// checks it before injecting a second copy.
pub const INJECTED_MARKER: &str = "data-proxywarp-injected";

/// The interceptor payload. Placeholders are substituted at
/// HTML-rewrite time; the three values are plain lowercase hostnames
/// and a token, so no quoting beyond the template's own is needed.
const TEMPLATE: &str = r#"<script data-proxywarp-injected="true">
(function () {
  'use strict';
  var TOKEN = '__TOKEN__';
  var BASE_DOMAIN = '__BASE_DOMAIN__';
  var UPSTREAM = '__UPSTREAM_DOMAIN__';
  var PROXY_ORIGIN = 'https://' + TOKEN + '.' + BASE_DOMAIN;

  function isExternal(url) {
    if (!url || typeof url !== 'string') return false;
    if (!/^https?:\/\//i.test(url)) return false;
    try {
      var host = new URL(url).hostname.toLowerCase();
      return host !== UPSTREAM && host !== 'www.' + UPSTREAM;
    } catch (e) {
      return false;
    }
  }

  function proxied(url) {
    if (!url || typeof url !== 'string') return url;
    if (url.indexOf(BASE_DOMAIN) !== -1) return url;
    if (url.charAt(0) === '#') return url;
    if (/^(javascript|mailto|tel):/i.test(url)) return url;
    if (/^https?:\/\//i.test(url)) {
      if (isExternal(url)) return url;
      try {
        var u = new URL(url);
        return PROXY_ORIGIN + u.pathname + u.search + u.hash;
      } catch (e) {
        return url;
      }
    }
    if (url.charAt(0) === '/') return PROXY_ORIGIN + url;
    return url;
  }

  function rewriteSubtree(root) {
    if (root.nodeType !== 1) return;
    var anchors = [];
    if (root.matches && root.matches('a[href]')) anchors.push(root);
    if (root.querySelectorAll) {
      anchors = anchors.concat(Array.prototype.slice.call(root.querySelectorAll('a[href]')));
    }
    anchors.forEach(function (a) {
      var href = a.getAttribute('href');
      if (href && href.indexOf(BASE_DOMAIN) === -1 && !isExternal(href)) {
        var mapped = proxied(href);
        if (mapped !== href) a.setAttribute('href', mapped);
      }
    });
    var forms = [];
    if (root.matches && root.matches('form[action]')) forms.push(root);
    if (root.querySelectorAll) {
      forms = forms.concat(Array.prototype.slice.call(root.querySelectorAll('form[action]')));
    }
    forms.forEach(function (f) {
      var action = f.getAttribute('action');
      if (action && action.indexOf(BASE_DOMAIN) === -1 && !isExternal(action)) {
        var mapped = proxied(action);
        if (mapped !== action) f.setAttribute('action', mapped);
      }
    });
  }

  function install() {
    var pushState = history.pushState;
    history.pushState = function (state, title, url) {
      return pushState.call(history, state, title, url == null ? url : proxied(String(url)));
    };
    var replaceState = history.replaceState;
    history.replaceState = function (state, title, url) {
      return replaceState.call(history, state, title, url == null ? url : proxied(String(url)));
    };

    try {
      var proto = Object.getPrototypeOf(window.location) || Location.prototype;
      var hrefDesc = Object.getOwnPropertyDescriptor(proto, 'href');
      if (hrefDesc && hrefDesc.set) {
        Object.defineProperty(proto, 'href', {
          get: hrefDesc.get,
          set: function (value) { hrefDesc.set.call(this, proxied(String(value))); },
          configurable: true
        });
      }
      var locAssign = Location.prototype.assign;
      Location.prototype.assign = function (url) {
        return locAssign.call(this, proxied(String(url)));
      };
      var locReplace = Location.prototype.replace;
      Location.prototype.replace = function (url) {
        return locReplace.call(this, proxied(String(url)));
      };
    } catch (e) {
      // some engines seal the Location prototype
    }

    document.addEventListener('click', function (event) {
      var node = event.target;
      while (node && node.tagName !== 'A') node = node.parentElement;
      if (!node) return;
      var href = node.getAttribute('href');
      if (!href || href.charAt(0) === '#') return;
      if (/^(javascript|mailto|tel):/i.test(href)) return;
      if (href.indexOf(BASE_DOMAIN) !== -1) return;
      if (isExternal(href)) return;
      event.preventDefault();
      window.location.href = proxied(href);
    }, true);

    var observer = new MutationObserver(function (mutations) {
      mutations.forEach(function (mutation) {
        Array.prototype.forEach.call(mutation.addedNodes, rewriteSubtree);
      });
    });
    observer.observe(document.documentElement, { childList: true, subtree: true });

    var origFetch = window.fetch;
    window.fetch = function (input, init) {
      if (typeof input === 'string') {
        return origFetch.call(window, proxied(input), init);
      }
      if (typeof Request !== 'undefined' && input instanceof Request) {
        var mapped = proxied(input.url);
        if (mapped !== input.url) {
          return origFetch.call(window, new Request(mapped, input), init);
        }
      }
      return origFetch.call(window, input, init);
    };

    var origOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function (method, url) {
      var args = Array.prototype.slice.call(arguments);
      if (typeof url === 'string') args[1] = proxied(url);
      return origOpen.apply(this, args);
    };
  }

  if (document.readyState === 'loading') {
    document.addEventListener('DOMContentLoaded', install);
  } else {
    install();
  }
})();
</script>"#;

/// Render the interceptor for one proxied page.
pub fn render(token: &str, base_domain: &str, upstream_domain: &str) -> String {
    TEMPLATE
        .replace("__TOKEN__", token)
        .replace("__BASE_DOMAIN__", base_domain)
        .replace("__UPSTREAM_DOMAIN__", upstream_domain)
}
